//! Error types for the benchmark harness.
//!
//! Only startup can fail: every variant describes an environment the measurements cannot run
//! in. Nothing inside the timed region returns an error.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Failed to allocate write+execute page ({len} bytes): {source}")]
    Alloc { len: usize, source: io::Error },

    #[error("Allocated page isn't cacheline aligned?! (address {addr:#x})")]
    Misaligned { addr: usize },

    #[error("Failed to create write/execute alias mapping ({step}): {source}")]
    AliasMap { step: &'static str, source: io::Error },

    #[error("Unsupported platform: {0}")]
    Unsupported(&'static str),
}

pub type BenchResult<T> = Result<T, BenchError>;
