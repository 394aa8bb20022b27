//! Self-modifying code cost survey
//!
//! Times every write/flush/layout strategy the processor supports and prints the best
//! `rdtsc` count per 1000 write + execute cycles. Exits with status 1 when executable memory
//! can't be set up.

use std::process::ExitCode;

use log::{error, info};

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(unix, target_arch = "x86_64"))]
fn main() -> ExitCode {
    use smc_jit_bench::config::BenchConfig;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match smc_jit_bench::report::run(BenchConfig::default()) {
        Ok(report) => {
            print!("{report}");
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{err}");
            error!("Setup failed, nothing measured");
            ExitCode::from(1)
        }
    }
}

#[cfg(not(all(unix, target_arch = "x86_64")))]
fn main() -> ExitCode {
    env_logger::init();
    println!("{}", smc_jit_bench::BenchError::Unsupported("needs x86_64 and a unix memory API"));
    error!("Setup failed, nothing measured");
    info!("Done");
    ExitCode::from(1)
}
