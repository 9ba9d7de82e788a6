//! Utility functions and well-known locations

use std::time::Duration;

/// Where the `ptp_ocp` driver registers timecards.
///
/// Each unit appears as a symlink named `ocpN` pointing at its device
/// directory. Overridable through [`crate::config::Config::class_path`] for
/// testing purposes.
pub const TIMECARD_CLASS_PATH: &str = "/sys/class/timecard";

/// Prefix every timecard kernel name starts with.
pub const UNIT_PREFIX: &str = "ocp";

/// Attributes a unit must expose, readable, to be considered valid.
pub const REQUIRED_MARKERS: [&str; 2] = ["serialnum", "available_clock_sources"];

/// Number of SMA connectors, signal generators, frequency counters and
/// timestampers on a unit.
pub const PORT_COUNT: u8 = 4;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// 10 KiB
pub const DEFAULT_MAX_ATTRIBUTE_SIZE: usize = 10 * 1024;

pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(60);

pub const DEFAULT_DRIFT_BOUND: f64 = 1000.0;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// About 24 hours at the default interval.
pub const DEFAULT_MAX_ITERATIONS: u64 = 86_400;

pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Split a space separated "available_*" attribute into its tokens.
pub fn split_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_owned).collect()
}
