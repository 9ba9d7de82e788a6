//! Discovery of the optional attribute groups a unit exposes
//!
//! Which groups exist depends on the hardware build and the driver version.
//! Presence is derived from the filesystem, never configured, and cached for
//! a bounded time so a poll loop doesn't rescan every tick.
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::{sysfs::attribute::AttributeStore, util::PORT_COUNT};

/// Attributes of every `genN` signal generator
pub const GENERATOR_ATTRIBUTES: [&str; 7] =
    ["duty", "period", "phase", "polarity", "running", "start", "signal"];

/// Attributes of every `freqN` frequency counter
pub const COUNTER_ATTRIBUTES: [&str; 2] = ["frequency", "seconds"];

/// Time of day protocol attributes
pub const TOD_ATTRIBUTES: [&str; 5] = [
    "tod_protocol",
    "available_tod_protocols",
    "tod_baud_rate",
    "available_tod_baud_rates",
    "tod_correction",
];

/// Clock attributes every unit is expected to have
pub const BASIC_ATTRIBUTES: [&str; 6] = [
    "serialnum",
    "available_clock_sources",
    "clock_source",
    "gnss_sync",
    "clock_status_drift",
    "clock_status_offset",
];

/// An optional attribute group
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Basic,
    Sma,
    TimeOfDay,
    /// `genN`, 1 based
    SignalGenerator(u8),
    /// `freqN`, 1 based
    FrequencyCounter(u8),
    /// `tsN`, 1 based
    Timestamper(u8),
}

impl Capability {
    /// Every capability a unit could have
    pub fn all() -> impl Iterator<Item = Capability> {
        [Self::Basic, Self::Sma, Self::TimeOfDay]
            .into_iter()
            .chain((1..=PORT_COUNT).map(Self::SignalGenerator))
            .chain((1..=PORT_COUNT).map(Self::FrequencyCounter))
            .chain((1..=PORT_COUNT).map(Self::Timestamper))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("basic"),
            Self::Sma => f.write_str("sma"),
            Self::TimeOfDay => f.write_str("time-of-day"),
            Self::SignalGenerator(n) => write!(f, "signal-generator{n}"),
            Self::FrequencyCounter(n) => write!(f, "frequency-counter{n}"),
            Self::Timestamper(n) => write!(f, "timestamper{n}"),
        }
    }
}

/// Attribute groups found on a unit.
///
/// Each group is [`None`] when absent, or lists the attributes that resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub basic: Option<Vec<String>>,
    pub sma: Option<Vec<String>>,
    pub time_of_day: Option<Vec<String>>,
    pub signal_generators: [Option<Vec<String>>; 4],
    pub frequency_counters: [Option<Vec<String>>; 4],
    pub timestampers: [Option<Vec<String>>; 4],
}

impl CapabilitySet {
    /// Attributes of `cap` that resolved, if it is present
    pub fn attributes(&self, cap: Capability) -> Option<&[String]> {
        match cap {
            Capability::Basic => self.basic.as_deref(),
            Capability::Sma => self.sma.as_deref(),
            Capability::TimeOfDay => self.time_of_day.as_deref(),
            Capability::SignalGenerator(n) => indexed(&self.signal_generators, n),
            Capability::FrequencyCounter(n) => indexed(&self.frequency_counters, n),
            Capability::Timestamper(n) => indexed(&self.timestampers, n),
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.attributes(cap).is_some()
    }

    /// Every present capability, in [`Capability::all`] order
    pub fn present(&self) -> Vec<Capability> {
        Capability::all().filter(|c| self.has(*c)).collect()
    }

    pub fn has_signal_generators(&self) -> bool {
        self.signal_generators.iter().any(Option::is_some)
    }

    pub fn has_frequency_counters(&self) -> bool {
        self.frequency_counters.iter().any(Option::is_some)
    }

    pub fn has_timestampers(&self) -> bool {
        self.timestampers.iter().any(Option::is_some)
    }
}

fn indexed(groups: &[Option<Vec<String>>; 4], n: u8) -> Option<&[String]> {
    usize::from(n)
        .checked_sub(1)
        .and_then(|i| groups.get(i))
        .and_then(|g| g.as_deref())
}

/// Detects and caches a unit's [`CapabilitySet`]
#[derive(Debug)]
pub struct CapabilityScanner {
    store: Arc<dyn AttributeStore>,
    ttl: Duration,
    cache: Mutex<Option<(Instant, CapabilitySet)>>,
}

impl CapabilityScanner {
    /// Scanner whose results stay fresh for `ttl`
    pub fn new(store: Arc<dyn AttributeStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// The unit's capabilities.
    ///
    /// Returns the cached set while it is younger than the freshness window,
    /// unless `force_refresh`.
    pub fn scan(&self, force_refresh: bool) -> CapabilitySet {
        if !force_refresh {
            if let Some((at, set)) = &*self.cache.lock() {
                if at.elapsed() < self.ttl {
                    return set.clone();
                }
            }
        }
        // Not holding the cache lock while probing
        let set = self.detect();
        *self.cache.lock() = Some((Instant::now(), set.clone()));
        set
    }

    /// Drop the cached set, the next [`CapabilityScanner::scan`] checks again.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn detect(&self) -> CapabilitySet {
        let sma: Vec<String> = ["available_sma_inputs", "available_sma_outputs"]
            .into_iter()
            .map(str::to_owned)
            .chain((1..=PORT_COUNT).flat_map(|i| [format!("sma{i}"), format!("sma{i}_out")]))
            .collect();
        let set = CapabilitySet {
            basic: self.present(BASIC_ATTRIBUTES.iter().map(|a| a.to_string())),
            sma: self.present(sma),
            time_of_day: self.present(TOD_ATTRIBUTES.iter().map(|a| a.to_string())),
            signal_generators: self.indexed("gen", &GENERATOR_ATTRIBUTES),
            frequency_counters: self.indexed("freq", &COUNTER_ATTRIBUTES),
            timestampers: [1, 2, 3, 4].map(|n| {
                self.store
                    .list(&format!("ts{n}"))
                    .ok()
                    .filter(|files| !files.is_empty())
            }),
        };
        let names: Vec<_> = set.present().iter().map(ToString::to_string).collect();
        debug!(capabilities = %names.join(" "), "scanned capabilities");
        set
    }

    /// The attributes of `names` that exist, or [`None`] if none do
    fn present<I: IntoIterator<Item = String>>(&self, names: I) -> Option<Vec<String>> {
        let found: Vec<String> = names.into_iter().filter(|n| self.store.exists(n)).collect();
        (!found.is_empty()).then_some(found)
    }

    /// `{prefix}N/{attr}` for every index
    fn indexed(&self, prefix: &str, attrs: &[&str]) -> [Option<Vec<String>>; 4] {
        [1, 2, 3, 4].map(|n| {
            self.present(attrs.iter().map(|a| format!("{prefix}{n}/{a}")))
                .map(|found| {
                    found
                        .into_iter()
                        .map(|p| p.rsplit('/').next().unwrap_or_default().to_owned())
                        .collect()
                })
        })
    }
}
