//! Infer L1 data cache geometry (line size, capacity, associativity) from
//! pointer-chase timing alone.
//!
//! The [`engine::Engine`] drives a [`backend::Backend`]: either the real
//! [`backend::Hardware`] or the [`sim::SimulatedCache`] model used by the tests.
pub mod backend;
pub mod chain;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod platform;
pub mod pool;
pub mod probe;
pub mod sim;
pub mod stats;
pub mod timing;
pub mod verify;

pub use config::Config;
pub use engine::{Engine, Report};
pub use error::{Error, Result};

/// Convert number of bytes to formatted string
pub fn format_size(bytes: f32) -> String {
    const GB: f32 = 1024.0 * 1024.0 * 1024.0;
    const MB: f32 = 1024.0 * 1024.0;
    const KB: f32 = 1024.0;

    if bytes >= GB {
        format!("{:.2} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes / KB)
    } else {
        format!("{:.2} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:>4} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_int_sizes_pick_largest_unit() {
        assert_eq!(format_size_fixed_int(512), " 512 B");
        assert_eq!(format_size_fixed_int(32 * 1024), "  32 KiB");
        assert_eq!(format_size_fixed_int(3 * 1024 * 1024), "   3 MiB");
    }

    #[test]
    fn fractional_sizes_keep_two_decimals() {
        assert_eq!(format_size(1536.0), "1.50 KiB");
        assert_eq!(format_size(100.0), "100.00 B");
    }
}
