//! Runtime settings using Figment
//!
//! Settings are loaded from, in increasing priority:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `TIMECARD_`
//!
//! # Example
//! ```no_run
//! use timecard::config::Config;
//!
//! let config = Config::load_from("timecard.toml")?;
//! println!("polling every {:?}", config.interval);
//! # Ok::<(), timecard::error::Error>(())
//! ```
//!
//! Durations are written the humantime way, `TIMECARD_INTERVAL=250ms`.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    sysfs::attribute::ReadLimits,
    util::*,
};

/// Settings for finding and monitoring a timecard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Use this device directory instead of searching
    pub device_path: Option<PathBuf>,

    /// Where to search for units
    pub class_path: PathBuf,

    /// Time between polls, clamped to 100ms..=1h when used
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// How long [`crate::monitor::PollingMonitor::stop`] waits for the
    /// polling thread
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,

    /// Bound on taking one status snapshot
    #[serde(with = "humantime_serde")]
    pub snapshot_timeout: Duration,

    /// Hard ceiling on the number of ticks in one monitoring run
    pub max_iterations: u64,

    /// Bound on a single attribute read or write
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Largest attribute accepted, in bytes
    pub max_attribute_size: usize,

    /// Clock drift is acceptable while `|drift| < drift_bound`
    pub drift_bound: f64,

    /// How long a capability scan stays fresh
    #[serde(with = "humantime_serde")]
    pub capability_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: None,
            class_path: PathBuf::from(TIMECARD_CLASS_PATH),
            interval: DEFAULT_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_attribute_size: DEFAULT_MAX_ATTRIBUTE_SIZE,
            drift_bound: DEFAULT_DRIFT_BOUND,
            capability_ttl: DEFAULT_CAPABILITY_TTL,
        }
    }
}

impl Config {
    /// Defaults overridden by `TIMECARD_*` environment variables
    pub fn load() -> Result<Self> {
        Self::extract(Figment::new().merge(env()))
    }

    /// Defaults overridden by the TOML file at `path`, if it exists, then by
    /// `TIMECARD_*` environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(env()),
        )
    }

    /// Bounds for attribute access
    pub fn read_limits(&self) -> ReadLimits {
        ReadLimits {
            timeout: self.read_timeout,
            max_size: self.max_attribute_size,
        }
    }

    /// Polling interval clamped to `[100ms, 1h]`
    pub fn clamped_interval(&self) -> Duration {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    /// Reject settings that would disable a bound.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("join_timeout", self.join_timeout),
            ("snapshot_timeout", self.snapshot_timeout),
            ("read_timeout", self.read_timeout),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Validation(format!("{name} must be greater than zero")));
        }
        if self.max_attribute_size == 0 {
            return Err(Error::Validation("max_attribute_size must be greater than zero".into()));
        }
        if self.max_iterations == 0 {
            return Err(Error::Validation("max_iterations must be greater than zero".into()));
        }
        if !(self.drift_bound.is_finite() && self.drift_bound > 0.0) {
            return Err(Error::Validation(format!(
                "drift_bound must be a positive number, got {}",
                self.drift_bound
            )));
        }
        Ok(())
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

fn env() -> Env {
    Env::prefixed("TIMECARD_")
}
