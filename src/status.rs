//! Status snapshots and health checks
//!
//! A [`StatusSnapshot`] is one timestamped, immutable view of every readable
//! attribute on a unit. Failures are contained per attribute: a field that
//! couldn't be read carries an error marker and everything else is still
//! reported.
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::{
    capability::{
        Capability, CapabilityScanner, CapabilitySet, COUNTER_ATTRIBUTES, GENERATOR_ATTRIBUTES,
    },
    config::Config,
    error::{AttributeError, Result},
    sysfs::attribute,
    system::class::{
        timecard::{SmaDirection, Timecard},
        Device,
    },
    util::{split_tokens, PORT_COUNT},
};

/// One attribute as it was read into a snapshot
///
/// Serializes as the value itself, `null` when the attribute doesn't exist,
/// or `{"error": "..."}` when it exists but couldn't be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field<T> {
    Value(T),
    Error { error: String },
    Missing,
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Field<U> {
        match self {
            Self::Value(v) => Field::Value(f(v)),
            Self::Error { error } => Field::Error { error },
            Self::Missing => Field::Missing,
        }
    }
}

impl Field<String> {
    pub fn as_str(&self) -> Option<&str> {
        self.value().map(String::as_str)
    }

    /// Flat text form, empty when missing
    fn cell(&self) -> String {
        match self {
            Self::Value(v) => v.clone(),
            Self::Error { error } => format!("error: {error}"),
            Self::Missing => String::new(),
        }
    }
}

impl<T> From<attribute::Result<T>> for Field<T> {
    fn from(r: attribute::Result<T>) -> Self {
        match r {
            Ok(v) => Self::Value(v),
            Err(AttributeError::NotFound(_)) => Self::Missing,
            Err(e) => Self::Error {
                error: e.to_string(),
            },
        }
    }
}

/// Result of a single health check
///
/// Serializes as `true`, `false` or `null`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "Option<bool>")]
pub enum CheckState {
    Pass,
    Fail,
    /// The check's input couldn't be read or understood
    Indeterminate,
}

impl CheckState {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Pass => Some(true),
            Self::Fail => Some(false),
            Self::Indeterminate => None,
        }
    }
}

impl From<bool> for CheckState {
    fn from(b: bool) -> Self {
        if b {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

impl From<CheckState> for Option<bool> {
    fn from(c: CheckState) -> Self {
        c.as_bool()
    }
}

/// The fixed set of health checks
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    /// Device root still exists
    pub device_accessible: CheckState,
    /// `serialnum` could be read
    pub serial_readable: CheckState,
    /// `gnss_sync` reports `SYNC`
    pub gnss_synchronized: CheckState,
    /// A clock source other than `NONE` is selected
    pub clock_source_set: CheckState,
    /// `|clock_status_drift|` is below the configured bound
    pub clock_drift_acceptable: CheckState,
}

impl HealthChecks {
    /// Every check with its name
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, CheckState)> {
        [
            ("device_accessible", self.device_accessible),
            ("serial_readable", self.serial_readable),
            ("gnss_synchronized", self.gnss_synchronized),
            ("clock_source_set", self.clock_source_set),
            ("clock_drift_acceptable", self.clock_drift_acceptable),
        ]
        .into_iter()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    /// No check failed. Indeterminate checks don't count against this.
    pub healthy: bool,
    pub checks: HealthChecks,
}

impl HealthCheckResult {
    fn new(checks: HealthChecks) -> Self {
        Self {
            healthy: checks.iter().all(|(_, c)| c != CheckState::Fail),
            checks,
        }
    }
}

/// PTP clock attributes read through the `ptp` link
pub const PTP_CLOCK_ATTRIBUTES: [&str; 7] = [
    "clock_name",
    "max_adj",
    "n_alarm",
    "n_ext_ts",
    "n_per_out",
    "n_pins",
    "pps_available",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub kernel_name: Option<String>,
    pub serial_number: Field<String>,
    pub ptp_device: Option<String>,
    pub pps_device: Option<String>,
    /// Details of the linked PTP clock, if there is one
    pub ptp_clock: Option<PtpClock>,
}

/// The PTP hardware clock a unit registers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtpClock {
    /// Device name, like `ptp3`
    pub device: String,
    /// Every attribute of [`PTP_CLOCK_ATTRIBUTES`] that exists
    pub attributes: BTreeMap<String, Field<String>>,
    /// Programmable pins, by name
    pub pins: BTreeMap<String, PtpPin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtpPin {
    pub function: Field<String>,
    pub state: Field<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockStatus {
    pub source: Field<String>,
    pub available_sources: Field<Vec<String>>,
    pub gnss_sync: Field<String>,
    pub synchronized: CheckState,
    pub drift: Field<String>,
    pub offset: Field<String>,
    pub utc_tai_offset: Field<String>,
    pub internal_pps_cable_delay: Field<String>,
    pub external_pps_cable_delay: Field<String>,
    pub irig_b_mode: Field<String>,
    pub holdover: Field<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmaConfiguration {
    pub available_inputs: Field<Vec<String>>,
    pub available_outputs: Field<Vec<String>>,
    /// `sma1` through `sma4`
    pub inputs: BTreeMap<String, Field<String>>,
    /// `sma1` through `sma4`, read from `smaN_out`
    pub outputs: BTreeMap<String, Field<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalGenerator {
    pub duty: Field<String>,
    pub period: Field<String>,
    pub phase: Field<String>,
    pub polarity: Field<String>,
    pub running: Field<String>,
    pub start: Field<String>,
    pub signal: Field<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyCounter {
    pub frequency: Field<String>,
    pub seconds: Field<String>,
}

/// Everything readable on a unit at one point in time
///
/// Optional sections are only present, and only serialized, when the unit
/// has the matching [`Capability`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub device_info: DeviceInfo,
    pub clock_status: ClockStatus,
    pub sma_configuration: SmaConfiguration,
    pub health_status: HealthCheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_generators: Option<BTreeMap<String, SignalGenerator>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_counters: Option<BTreeMap<String, FrequencyCounter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tod_attributes: Option<BTreeMap<String, Field<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestampers: Option<BTreeMap<String, BTreeMap<String, Field<String>>>>,
}

impl StatusSnapshot {
    /// Selected clock source, if it was read
    pub fn clock_source(&self) -> Option<&str> {
        self.clock_status.source.as_str()
    }

    /// GNSS synchronization, if it could be determined
    pub fn synchronized(&self) -> Option<bool> {
        self.clock_status.synchronized.as_bool()
    }

    pub fn healthy(&self) -> bool {
        self.health_status.healthy
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write this snapshot to `path` as JSON
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json_pretty().map_err(io::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write the main parameters to `path` as `Parameter,Value` CSV
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_csv(File::create(path)?)
    }

    /// Write the main parameters as `Parameter,Value` CSV rows.
    ///
    /// Missing values are empty, unreadable ones start with `error: `.
    pub fn write_csv<W: io::Write>(&self, w: W) -> Result<()> {
        let clock = &self.clock_status;
        let sma = &self.sma_configuration;
        let mut rows = vec![
            ("Timestamp".to_owned(), self.timestamp.to_rfc3339()),
            ("Serial Number".to_owned(), self.device_info.serial_number.cell()),
            ("Clock Source".to_owned(), clock.source.cell()),
            ("GNSS Sync".to_owned(), clock.gnss_sync.cell()),
            ("Clock Drift".to_owned(), clock.drift.cell()),
            ("Clock Offset".to_owned(), clock.offset.cell()),
            ("Healthy".to_owned(), self.healthy().to_string()),
        ];
        for (port, value) in &sma.inputs {
            rows.push((format!("{} Input", port.to_uppercase()), value.cell()));
        }
        for (port, value) in &sma.outputs {
            rows.push((format!("{} Output", port.to_uppercase()), value.cell()));
        }

        let mut out = csv::Writer::from_writer(w);
        out.write_record(["Parameter", "Value"])?;
        for (name, value) in &rows {
            out.write_record([name, value])?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Whether a `gnss_sync` value means synchronized.
///
/// The driver reports `SYNC` when locked and `LOST @ <time>` otherwise.
pub fn is_synchronized(value: &str) -> bool {
    value
        .split_whitespace()
        .next()
        .map_or(false, |t| t.eq_ignore_ascii_case("SYNC"))
}

/// Apply `f` to a readable field, anything else is indeterminate
fn check(field: &Field<String>, f: impl FnOnce(&str) -> CheckState) -> CheckState {
    field.as_str().map_or(CheckState::Indeterminate, f)
}

/// Builds [`StatusSnapshot`]s for one unit
#[derive(Debug)]
pub struct StatusAggregator {
    device: Timecard,
    scanner: CapabilityScanner,
    drift_bound: f64,
}

impl StatusAggregator {
    /// Aggregator over `device`, caching capabilities for `capability_ttl`
    pub fn new(device: Timecard, capability_ttl: Duration, drift_bound: f64) -> Self {
        let scanner = CapabilityScanner::new(device.store().clone(), capability_ttl);
        Self {
            device,
            scanner,
            drift_bound,
        }
    }

    pub fn from_config(device: Timecard, config: &Config) -> Self {
        Self::new(device, config.capability_ttl, config.drift_bound)
    }

    pub fn device(&self) -> &Timecard {
        &self.device
    }

    pub fn scanner(&self) -> &CapabilityScanner {
        &self.scanner
    }

    /// Read everything into a new snapshot.
    ///
    /// Never fails, unreadable attributes become [`Field::Error`].
    pub fn snapshot(&self) -> StatusSnapshot {
        let caps = self.scanner.scan(false);
        let dev = &self.device;

        let serial_number = self.field("serialnum");
        let clock_status = self.clock_status();
        let health_status = self.evaluate(
            dev.path().exists(),
            &serial_number,
            &clock_status.gnss_sync,
            &clock_status.source,
            &clock_status.drift,
        );

        let snapshot = StatusSnapshot {
            timestamp: Utc::now(),
            device_info: DeviceInfo {
                path: dev.path().to_path_buf(),
                kernel_name: dev.kernel_name().map(str::to_owned),
                serial_number,
                ptp_device: dev.ptp_device(),
                pps_device: dev.pps_device(),
                ptp_clock: self.ptp_clock(),
            },
            clock_status,
            sma_configuration: self.sma_configuration(),
            health_status,
            signal_generators: self.signal_generators(&caps),
            frequency_counters: self.frequency_counters(&caps),
            tod_attributes: caps.time_of_day.as_ref().map(|attrs| {
                attrs
                    .iter()
                    .map(|a| (a.clone(), self.field(a)))
                    .collect()
            }),
            timestampers: self.timestampers(&caps),
        };
        debug!(healthy = snapshot.healthy(), "took status snapshot");
        snapshot
    }

    /// Evaluate the health checks from fresh reads.
    pub fn health_check(&self) -> HealthCheckResult {
        self.evaluate(
            self.device.path().exists(),
            &self.field("serialnum"),
            &self.field("gnss_sync"),
            &self.field("clock_source"),
            &self.field("clock_status_drift"),
        )
    }

    fn evaluate(
        &self,
        accessible: bool,
        serial: &Field<String>,
        gnss: &Field<String>,
        source: &Field<String>,
        drift: &Field<String>,
    ) -> HealthCheckResult {
        HealthCheckResult::new(HealthChecks {
            device_accessible: accessible.into(),
            serial_readable: serial.value().is_some().into(),
            gnss_synchronized: check(gnss, |v| is_synchronized(v).into()),
            clock_source_set: check(source, |v| {
                (!v.is_empty() && !v.eq_ignore_ascii_case("NONE")).into()
            }),
            clock_drift_acceptable: check(drift, |v| match v.parse::<f64>() {
                Ok(d) if d.is_finite() => (d.abs() < self.drift_bound).into(),
                _ => CheckState::Indeterminate,
            }),
        })
    }

    fn field(&self, name: &str) -> Field<String> {
        self.device.read(name).into()
    }

    fn list_field(&self, name: &str) -> Field<Vec<String>> {
        self.field(name).map(|v| split_tokens(&v))
    }

    fn ptp_clock(&self) -> Option<PtpClock> {
        let device = self.device.ptp_device()?;
        let attributes = PTP_CLOCK_ATTRIBUTES
            .iter()
            .filter_map(|a| match self.field(&format!("ptp/{a}")) {
                Field::Missing => None,
                f => Some((a.to_string(), f)),
            })
            .collect();
        let pins = match self.device.store().subdirs("ptp/pins") {
            Ok(names) => names
                .into_iter()
                .map(|pin| {
                    let [function, state] =
                        ["function", "state"].map(|a| self.field(&format!("ptp/pins/{pin}/{a}")));
                    (pin, PtpPin { function, state })
                })
                .collect(),
            Err(e) => {
                if !e.is_not_found() {
                    debug!(error = %e, "couldn't list PTP pins");
                }
                BTreeMap::new()
            }
        };
        Some(PtpClock {
            device,
            attributes,
            pins,
        })
    }

    fn clock_status(&self) -> ClockStatus {
        let gnss_sync = self.field("gnss_sync");
        let synchronized = check(&gnss_sync, |v| is_synchronized(v).into());
        ClockStatus {
            source: self.field("clock_source"),
            available_sources: self.list_field("available_clock_sources"),
            gnss_sync,
            synchronized,
            drift: self.field("clock_status_drift"),
            offset: self.field("clock_status_offset"),
            utc_tai_offset: self.field("utc_tai_offset"),
            internal_pps_cable_delay: self.field("internal_pps_cable_delay"),
            external_pps_cable_delay: self.field("external_pps_cable_delay"),
            irig_b_mode: self.field("irig_b_mode"),
            holdover: self.field("holdover"),
        }
    }

    fn sma_configuration(&self) -> SmaConfiguration {
        let ports = |direction: SmaDirection| -> BTreeMap<String, Field<String>> {
            (1..=PORT_COUNT)
                .map(|port| (format!("sma{port}"), self.field(&direction.attribute(port))))
                .collect()
        };
        SmaConfiguration {
            available_inputs: self.list_field(SmaDirection::Input.available_attribute()),
            available_outputs: self.list_field(SmaDirection::Output.available_attribute()),
            inputs: ports(SmaDirection::Input),
            outputs: ports(SmaDirection::Output),
        }
    }

    fn signal_generators(&self, caps: &CapabilitySet) -> Option<BTreeMap<String, SignalGenerator>> {
        if !caps.has_signal_generators() {
            return None;
        }
        let gens = (1..=PORT_COUNT)
            .filter(|n| caps.has(Capability::SignalGenerator(*n)))
            .map(|n| {
                let [duty, period, phase, polarity, running, start, signal] =
                    GENERATOR_ATTRIBUTES.map(|a| self.field(&format!("gen{n}/{a}")));
                let gen = SignalGenerator {
                    duty,
                    period,
                    phase,
                    polarity,
                    running,
                    start,
                    signal,
                };
                (format!("gen{n}"), gen)
            })
            .collect();
        Some(gens)
    }

    fn frequency_counters(
        &self,
        caps: &CapabilitySet,
    ) -> Option<BTreeMap<String, FrequencyCounter>> {
        if !caps.has_frequency_counters() {
            return None;
        }
        let counters = (1..=PORT_COUNT)
            .filter(|n| caps.has(Capability::FrequencyCounter(*n)))
            .map(|n| {
                let [frequency, seconds] =
                    COUNTER_ATTRIBUTES.map(|a| self.field(&format!("freq{n}/{a}")));
                (format!("freq{n}"), FrequencyCounter { frequency, seconds })
            })
            .collect();
        Some(counters)
    }

    fn timestampers(
        &self,
        caps: &CapabilitySet,
    ) -> Option<BTreeMap<String, BTreeMap<String, Field<String>>>> {
        if !caps.has_timestampers() {
            return None;
        }
        let ts = (1..=PORT_COUNT)
            .filter_map(|n| {
                let files = caps.attributes(Capability::Timestamper(n))?;
                let values = files
                    .iter()
                    .map(|f| (f.clone(), self.field(&format!("ts{n}/{f}"))))
                    .collect();
                Some((format!("ts{n}"), values))
            })
            .collect();
        Some(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sysfs::attribute::ReadLimits, util::fixture};
    use anyhow::Result;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn aggregator(dir: &TempDir) -> Result<StatusAggregator> {
        let dev = Timecard::open(dir.path(), ReadLimits::default())?;
        Ok(StatusAggregator::new(dev, Duration::from_secs(60), 1000.0))
    }

    fn keys(v: &Value) -> Vec<&str> {
        v.as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    #[test]
    fn markers_only() -> Result<()> {
        let dir = fixture::minimal()?;
        let snap = aggregator(&dir)?.snapshot();
        let v = serde_json::to_value(&snap)?;
        assert_eq!(
            keys(&v),
            [
                "clock_status",
                "device_info",
                "health_status",
                "sma_configuration",
                "timestamp"
            ]
        );
        assert_eq!(v["device_info"]["serial_number"], "QP-0042");
        assert_eq!(v["clock_status"]["source"], Value::Null);
        assert_eq!(
            v["clock_status"]["available_sources"],
            json!(["PPS", "GNSS", "MAC", "IRIG-B"])
        );
        assert_eq!(v["sma_configuration"]["inputs"]["sma4"], Value::Null);

        let checks = snap.health_status.checks;
        assert_eq!(checks.device_accessible, CheckState::Pass);
        assert_eq!(checks.serial_readable, CheckState::Pass);
        assert_eq!(checks.gnss_synchronized, CheckState::Indeterminate);
        assert_eq!(checks.clock_source_set, CheckState::Indeterminate);
        assert_eq!(checks.clock_drift_acceptable, CheckState::Indeterminate);
        assert!(snap.healthy());
        Ok(())
    }

    #[test]
    fn gnss_sync_states() -> Result<()> {
        let dir = fixture::standard()?;
        let agg = aggregator(&dir)?;
        assert_eq!(agg.health_check().checks.gnss_synchronized, CheckState::Pass);

        fixture::write(dir.path(), "gnss_sync", "LOST @ 2024-01-01T00:00:00\n")?;
        let health = agg.health_check();
        assert_eq!(health.checks.gnss_synchronized, CheckState::Fail);
        assert!(!health.healthy);

        fs::remove_file(dir.path().join("gnss_sync"))?;
        let health = agg.health_check();
        assert_eq!(health.checks.gnss_synchronized, CheckState::Indeterminate);
        assert_eq!(health.checks.device_accessible, CheckState::Pass);
        assert_eq!(
            serde_json::to_value(health)?["checks"]["gnss_synchronized"],
            Value::Null
        );
        Ok(())
    }

    #[test]
    fn sync_token() {
        assert!(is_synchronized("SYNC"));
        assert!(is_synchronized("sync"));
        assert!(!is_synchronized("LOST @ 12:00"));
        assert!(!is_synchronized("1"));
        assert!(!is_synchronized("SYNCED"));
        assert!(!is_synchronized(""));
    }

    #[test]
    fn drift_bound() -> Result<()> {
        let dir = fixture::standard()?;
        let agg = aggregator(&dir)?;
        for (drift, expected) in [
            ("12.5", CheckState::Pass),
            ("-999.9", CheckState::Pass),
            ("1000", CheckState::Fail),
            ("-5000", CheckState::Fail),
            ("garbage", CheckState::Indeterminate),
            ("NaN", CheckState::Indeterminate),
        ] {
            fixture::write(dir.path(), "clock_status_drift", drift)?;
            assert_eq!(
                agg.health_check().checks.clock_drift_acceptable,
                expected,
                "drift {drift}"
            );
        }
        Ok(())
    }

    #[test]
    fn clock_source_none() -> Result<()> {
        let dir = fixture::standard()?;
        fixture::write(dir.path(), "clock_source", "NONE")?;
        let health = aggregator(&dir)?.health_check();
        assert_eq!(health.checks.clock_source_set, CheckState::Fail);
        assert!(!health.healthy);
        Ok(())
    }

    #[test]
    fn unreadable_field_is_marked() -> Result<()> {
        let dir = fixture::standard()?;
        fs::write(dir.path().join("clock_status_offset"), [0xff, 0xfe])?;
        let snap = aggregator(&dir)?.snapshot();
        assert!(snap.clock_status.offset.is_error());
        assert_eq!(snap.clock_status.drift.as_str(), Some("12.5"));
        assert_eq!(snap.clock_source(), Some("PPS"));
        let v = serde_json::to_value(&snap)?;
        assert!(v["clock_status"]["offset"]["error"].is_string());
        Ok(())
    }

    #[test]
    fn optional_sections() -> Result<()> {
        let dir = fixture::standard()?;
        fixture::add_generator(dir.path(), 2)?;
        fixture::add_counter(dir.path(), 1)?;
        fixture::write(dir.path(), "tod_protocol", "UBX")?;
        fixture::write(dir.path(), "available_tod_protocols", "NMEA UBX")?;
        fixture::write(dir.path(), "ts1/enable", "1")?;
        let snap = aggregator(&dir)?.snapshot();

        let gens = snap.signal_generators.as_ref().map(|g| g.keys().cloned().collect::<Vec<_>>());
        assert_eq!(gens, Some(vec!["gen2".to_owned()]));
        let counters = snap
            .frequency_counters
            .as_ref()
            .expect("frequency counters");
        assert_eq!(counters["freq1"].frequency.as_str(), Some("10000000"));

        let v = serde_json::to_value(&snap)?;
        assert_eq!(
            v["tod_attributes"],
            json!({"available_tod_protocols": "NMEA UBX", "tod_protocol": "UBX"})
        );
        assert_eq!(v["timestampers"], json!({"ts1": {"enable": "1"}}));
        assert_eq!(v["signal_generators"]["gen2"]["period"], "0");
        Ok(())
    }

    #[test]
    fn ptp_clock_details() -> Result<()> {
        let dir = fixture::standard()?;
        let clock = tempfile::tempdir()?;
        fixture::write(clock.path(), "clock_name", "ptp_ocp\n")?;
        fixture::write(clock.path(), "max_adj", "100000000\n")?;
        fixture::write(clock.path(), "n_pins", "4\n")?;
        fixture::write(clock.path(), "pins/SMA1/function", "1\n")?;
        fixture::write(clock.path(), "pins/SMA1/state", "0\n")?;
        fixture::write(clock.path(), "pins/SMA2/function", "2\n")?;
        let ptp3 = clock.path().join("ptp3");
        std::os::unix::fs::symlink(clock.path(), &ptp3)?;
        std::os::unix::fs::symlink(&ptp3, dir.path().join("ptp"))?;

        let snap = aggregator(&dir)?.snapshot();
        let ptp = snap.device_info.ptp_clock.as_ref().expect("ptp clock");
        assert_eq!(ptp.device, "ptp3");
        assert_eq!(
            ptp.attributes.keys().map(String::as_str).collect::<Vec<_>>(),
            ["clock_name", "max_adj", "n_pins"]
        );
        assert_eq!(ptp.attributes["clock_name"].as_str(), Some("ptp_ocp"));
        assert_eq!(ptp.pins["SMA1"].state.as_str(), Some("0"));
        assert_eq!(ptp.pins["SMA2"].function.as_str(), Some("2"));
        assert_eq!(ptp.pins["SMA2"].state, Field::Missing);

        let unlinked = aggregator(&fixture::minimal()?)?.snapshot();
        assert_eq!(unlinked.device_info.ptp_clock, None);
        Ok(())
    }

    #[test]
    fn csv_rows() -> Result<()> {
        let dir = fixture::standard()?;
        fs::write(dir.path().join("clock_status_offset"), [0xff, 0xfe])?;
        let snap = aggregator(&dir)?.snapshot();
        let out = dir.path().join("status.csv");
        snap.export_csv(&out)?;

        let mut reader = csv::Reader::from_path(&out)?;
        assert_eq!(reader.headers()?, vec!["Parameter", "Value"]);
        let rows: BTreeMap<String, String> = reader
            .records()
            .map(|r| r.map(|r| (r[0].to_owned(), r[1].to_owned())))
            .collect::<Result<_, _>>()?;
        assert_eq!(rows["Serial Number"], "QP-0042");
        assert_eq!(rows["Clock Source"], "PPS");
        assert_eq!(rows["GNSS Sync"], "SYNC");
        assert_eq!(rows["Healthy"], "true");
        assert_eq!(rows["SMA1 Input"], "None");
        assert_eq!(rows["SMA4 Output"], "PHC");
        assert!(rows["Clock Offset"].starts_with("error: "));
        assert_eq!(rows.len(), 15);
        Ok(())
    }

    #[test]
    fn stable_serialization() -> Result<()> {
        let dir = fixture::standard()?;
        let snap = aggregator(&dir)?.snapshot();
        assert_eq!(snap.to_json_pretty()?, snap.clone().to_json_pretty()?);

        let out = dir.path().join("status.json");
        snap.export(&out)?;
        let back: Value = serde_json::from_str(&fs::read_to_string(out)?)?;
        assert_eq!(back, serde_json::to_value(&snap)?);
        Ok(())
    }
}
