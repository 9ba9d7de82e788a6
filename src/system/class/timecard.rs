//! Typed access to a single timecard
//!
//! # Implementation
//!
//! Attributes are plain text. Lists, like `available_clock_sources`, are
//! space separated tokens. The driver rejects values it doesn't advertise,
//! but checking first gives callers a useful error instead of `EINVAL`.
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{candidates, Device};
use crate::{
    config::Config,
    error::{text, Error, Result},
    sysfs::attribute::{self, AttributeStore, ReadLimits, SysfsStore},
    util::{split_tokens, PORT_COUNT, REQUIRED_MARKERS},
};

/// Direction of an SMA connector
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmaDirection {
    Input,
    Output,
}

impl SmaDirection {
    /// Attribute holding the assignment of `port`
    pub fn attribute(self, port: u8) -> String {
        match self {
            Self::Input => format!("sma{port}"),
            Self::Output => format!("sma{port}_out"),
        }
    }

    /// Attribute advertising the allowed assignments
    pub fn available_attribute(self) -> &'static str {
        match self {
            Self::Input => "available_sma_inputs",
            Self::Output => "available_sma_outputs",
        }
    }
}

impl fmt::Display for SmaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// A set of SMA assignments to apply at once, keyed by port.
///
/// Signals named `none` (any case) are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaPlan {
    #[serde(default)]
    pub inputs: BTreeMap<u8, String>,
    #[serde(default)]
    pub outputs: BTreeMap<u8, String>,
}

/// Outcome of [`Timecard::apply_sma_configuration`]
#[derive(Debug, Default)]
pub struct SmaReport {
    /// Number of ports written
    pub applied: usize,

    /// Ports that were rejected or couldn't be written
    pub failures: Vec<(SmaDirection, u8, Error)>,
}

impl SmaReport {
    /// Whether every requested assignment was applied
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A timecard.
///
/// Once constructed, both required marker attributes were present and
/// readable.
#[derive(Debug, Clone)]
pub struct Timecard {
    /// Device root, as given or found. Not canonicalized, class entries are
    /// symlinks.
    path: PathBuf,

    store: Arc<dyn AttributeStore>,
}

// Construction
impl Timecard {
    /// Locate a timecard using the settings in `config`.
    ///
    /// See [`Timecard::resolve`]
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::resolve(
            config.device_path.as_deref(),
            &config.class_path,
            config.read_limits(),
        )
    }

    /// Use `explicit` if given, otherwise search `class` for the first
    /// verifiable unit.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if `explicit` doesn't exist, or no
    ///   candidate in `class` verifies
    /// - [`Error::DeviceAccess`] if `explicit` exists but a required
    ///   attribute is unreadable
    pub fn resolve(explicit: Option<&Path>, class: &Path, limits: ReadLimits) -> Result<Self> {
        match explicit {
            Some(path) => Self::open(path, limits),
            None => Self::find(class, limits),
        }
    }

    /// Use the device at `path`.
    ///
    /// # Errors
    ///
    /// - If `path` does not exist
    /// - If a required attribute is missing or unreadable
    pub fn open<P: AsRef<Path>>(path: P, limits: ReadLimits) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::DeviceNotFound(format!(
                "{}: {}",
                text::EXPLICIT_MISSING,
                path.display()
            )));
        }
        info!(path = %path.display(), "using specified device path");
        Self::with_store(Arc::new(SysfsStore::new(path, limits)))
    }

    /// Search `class` for the first unit whose required attributes are all
    /// readable.
    ///
    /// Each candidate read is bounded by `limits`, and a candidate that
    /// fails verification is logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if nothing verifies
    pub fn find(class: &Path, limits: ReadLimits) -> Result<Self> {
        let found = candidates(class).map_err(|e| {
            Error::DeviceNotFound(format!("couldn't list {}: {e}", class.display()))
        })?;
        if found.is_empty() {
            return Err(Error::DeviceNotFound(text::NO_CANDIDATES.into()));
        }
        for path in found {
            debug!(path = %path.display(), "checking candidate");
            match Self::with_store(Arc::new(SysfsStore::new(&path, limits))) {
                Ok(dev) => {
                    info!(path = %path.display(), "device found and verified");
                    return Ok(dev);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "candidate failed verification")
                }
            }
        }
        Err(Error::DeviceNotFound(format!(
            "no candidate in {} verified",
            class.display()
        )))
    }

    /// Use an existing [`AttributeStore`], rooted at the device directory.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if the root doesn't exist
    /// - [`Error::DeviceAccess`] if a required attribute is unreadable
    pub fn with_store(store: Arc<dyn AttributeStore>) -> Result<Self> {
        let path = store.root().to_path_buf();
        if !path.exists() {
            return Err(Error::DeviceNotFound(path.display().to_string()));
        }
        let dev = Self { path, store };
        for marker in REQUIRED_MARKERS {
            dev.required(marker)?;
        }
        Ok(dev)
    }
}

// Public
impl Timecard {
    /// Attribute store backing this device
    pub fn store(&self) -> &Arc<dyn AttributeStore> {
        &self.store
    }

    /// Read any attribute, see [`AttributeStore::read`]
    pub fn read(&self, name: &str) -> attribute::Result<String> {
        self.store.read(name)
    }

    /// Serial number, from `serialnum`
    pub fn serial_number(&self) -> Result<String> {
        self.required("serialnum")
    }

    /// Currently selected clock source
    pub fn current_clock_source(&self) -> Result<String> {
        Ok(self.store.read("clock_source")?)
    }

    /// Clock sources this unit accepts
    pub fn available_clock_sources(&self) -> Result<Vec<String>> {
        self.required("available_clock_sources")
            .map(|v| split_tokens(&v))
    }

    /// Select `source` as the clock source.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `source` isn't advertised by
    ///   `available_clock_sources`. Nothing is written.
    pub fn set_clock_source(&self, source: &str) -> Result<()> {
        let available = self.available_clock_sources()?;
        check_allowed("clock source", source, &available)?;
        self.store.write("clock_source", source)?;
        Ok(())
    }

    /// Signals the SMA inputs accept
    pub fn available_sma_inputs(&self) -> Result<Vec<String>> {
        self.available_sma(SmaDirection::Input)
    }

    /// Signals the SMA outputs accept
    pub fn available_sma_outputs(&self) -> Result<Vec<String>> {
        self.available_sma(SmaDirection::Output)
    }

    /// Advertised signals for `direction`
    pub fn available_sma(&self, direction: SmaDirection) -> Result<Vec<String>> {
        Ok(split_tokens(
            &self.store.read(direction.available_attribute())?,
        ))
    }

    /// Current assignment of SMA `port`
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `port` is outside `1..=4`
    pub fn sma(&self, direction: SmaDirection, port: u8) -> Result<String> {
        check_port(port)?;
        Ok(self.store.read(&direction.attribute(port))?)
    }

    /// Readable SMA input assignments, keyed by port
    pub fn sma_inputs(&self) -> BTreeMap<u8, String> {
        self.sma_all(SmaDirection::Input)
    }

    /// Readable SMA output assignments, keyed by port
    pub fn sma_outputs(&self) -> BTreeMap<u8, String> {
        self.sma_all(SmaDirection::Output)
    }

    /// Route `signal` to SMA input `port`
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `port` is outside `1..=4`, checked before
    ///   touching the device, or `signal` isn't in `available_sma_inputs`
    pub fn set_sma_input(&self, port: u8, signal: &str) -> Result<()> {
        self.set_sma(SmaDirection::Input, port, signal)
    }

    /// Route `signal` to SMA output `port`
    ///
    /// See [`Timecard::set_sma_input`]
    pub fn set_sma_output(&self, port: u8, signal: &str) -> Result<()> {
        self.set_sma(SmaDirection::Output, port, signal)
    }

    /// Set SMA `port` in `direction` to `signal`
    pub fn set_sma(&self, direction: SmaDirection, port: u8, signal: &str) -> Result<()> {
        check_port(port)?;
        let available = self.available_sma(direction)?;
        check_allowed(&format!("SMA {direction}"), signal, &available)?;
        self.store.write(&direction.attribute(port), signal)?;
        Ok(())
    }

    /// Apply every assignment in `plan`, inputs first.
    ///
    /// Failures don't stop the remaining assignments, they are collected in
    /// the returned [`SmaReport`].
    pub fn apply_sma_configuration(&self, plan: &SmaPlan) -> SmaReport {
        let mut report = SmaReport::default();
        let steps = plan
            .inputs
            .iter()
            .map(|(p, s)| (SmaDirection::Input, *p, s))
            .chain(
                plan.outputs
                    .iter()
                    .map(|(p, s)| (SmaDirection::Output, *p, s)),
            );
        for (direction, port, signal) in steps {
            if signal.trim().is_empty() || signal.eq_ignore_ascii_case("none") {
                continue;
            }
            match self.set_sma(direction, port, signal) {
                Ok(()) => report.applied += 1,
                Err(e) => report.failures.push((direction, port, e)),
            }
        }
        if report.is_complete() {
            info!(applied = report.applied, "SMA configuration applied");
        } else {
            warn!(
                applied = report.applied,
                failed = report.failures.len(),
                "SMA configuration partially applied"
            );
        }
        report
    }

    /// Name of the linked PTP clock device, like `ptp3`
    pub fn ptp_device(&self) -> Option<String> {
        self.link("ptp")
    }

    /// Name of the linked PPS device, like `pps1`
    pub fn pps_device(&self) -> Option<String> {
        self.link("pps")
    }

    /// Cheap health check: the device root still exists and the serial
    /// number is readable.
    pub fn is_healthy(&self) -> bool {
        self.path.exists() && self.serial_number().is_ok()
    }

    /// Whether the device is present with a non-empty serial number
    pub fn is_connected(&self) -> bool {
        self.path.exists() && self.serial_number().map_or(false, |s| !s.is_empty())
    }
}

// Private
impl Timecard {
    /// Read a required attribute, failing as [`Error::DeviceAccess`]
    fn required(&self, name: &str) -> Result<String> {
        self.store.read(name).map_err(|source| Error::DeviceAccess {
            name: name.into(),
            source,
        })
    }

    fn sma_all(&self, direction: SmaDirection) -> BTreeMap<u8, String> {
        (1..=PORT_COUNT)
            .filter_map(|port| {
                self.store
                    .read(&direction.attribute(port))
                    .ok()
                    .map(|v| (port, v))
            })
            .collect()
    }
}

impl Device for Timecard {
    fn path(&self) -> &Path {
        &self.path
    }
}

fn check_port(port: u8) -> Result<()> {
    if (1..=PORT_COUNT).contains(&port) {
        Ok(())
    } else {
        Err(Error::Validation(format!("{}, got {port}", text::PORT_RANGE)))
    }
}

fn check_allowed(what: &str, value: &str, available: &[String]) -> Result<()> {
    if available.iter().any(|a| a == value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{what} `{value}` is not one of [{}]",
            available.join(", ")
        )))
    }
}
