//! L1 Data Cache Characterization via Pointer Chasing
//!
//! Pins itself to one core, maps a large anonymous region and infers the L1 data
//! cache line size, capacity and associativity from latency alone. Progress is
//! streamed through `log` (`RUST_LOG=debug` for raw samples); the summary goes to
//! stdout.
//!
//! Environment overrides: `L1_PROBE_STRATEGY=probes|hierarchy`,
//! `L1_PROBE_LINE_STRATEGY=stride|false-sharing`, `L1_PROBE_REGION_MB=<n>`.
use std::process::ExitCode;

use l1_probe_rs::backend::Hardware;
use l1_probe_rs::{Config, Engine, Error, format_size_fixed_int, platform};
use log::error;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn run() -> Result<(), Error> {
    let config = Config::from_env()?;

    println!("=== L1 Data Cache Characterization ===");
    println!("Method: Pointer chasing with randomized chains");
    println!(
        "Strategy: {:?} (line size: {:?})",
        config.strategy, config.line_strategy
    );
    println!(
        "Samples per point: {} x {} steps, region {}\n",
        config.repeats,
        config.iterations,
        format_size_fixed_int(config.region_bytes as u64).trim()
    );

    // both are advisory; they only reduce noise
    platform::pin_current_thread(None);
    platform::elevate_current_thread();

    let mut hardware = Hardware::new(&config)?;
    let engine = Engine::new(config)?;
    let report = engine.run(&mut hardware)?;

    println!("\n{report}");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
