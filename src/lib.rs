//! Microbenchmarks for the cost of writing machine code and then executing it.
//!
//! Each strategy in [`strategy`] writes a short generated stream into executable memory in a
//! different way and calls it; [`timing`] counts cycles and [`report`] keeps the best count per
//! strategy. Everything that executes code needs x86_64 and a unix memory API.

pub mod codegen;
pub mod config;
pub mod error;
#[cfg(target_arch = "x86_64")]
pub mod hw;
#[cfg(unix)]
pub mod mem;
pub mod report;
#[cfg(all(unix, target_arch = "x86_64"))]
pub mod strategy;
pub mod timing;

pub use error::{BenchError, BenchResult};

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}
