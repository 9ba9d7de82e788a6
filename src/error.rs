//! Error handling stuff
use displaydoc::Display;
use std::{io, time::Duration};
use thiserror::Error;

/// Error type for [`crate::sysfs::attribute`]
///
/// These are contained as low as possible. Background polling turns them into
/// error markers inside a snapshot instead of propagating them.
#[derive(Debug, Display, Error)]
pub enum AttributeError {
    /// attribute `{0}` not found
    NotFound(String),

    /// couldn't access attribute `{name}`: {source}
    Access {
        name: String,
        #[source]
        source: io::Error,
    },

    /// attribute `{name}` timed out after {timeout:?}
    Timeout { name: String, timeout: Duration },

    /// attribute `{name}` is larger than {limit} bytes
    TooLarge { name: String, limit: usize },
}

impl AttributeError {
    /// Whether the attribute simply doesn't exist on this unit
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Error type for this crate
#[derive(Debug, Display, Error)]
pub enum Error {
    /// no verifiable timecard found: {0}
    DeviceNotFound(String),

    /// device attribute `{name}` is unreadable: {source}
    DeviceAccess {
        name: String,
        #[source]
        source: AttributeError,
    },

    /// {0}
    Attribute(#[from] AttributeError),

    /// invalid value: {0}
    Validation(String),

    /// monitor is already running
    MonitorAlreadyRunning,

    /// status snapshot timed out after {0:?}
    SnapshotTimeout(Duration),

    /// IO Failed: {0}
    Io(#[from] io::Error),

    /// CSV export failed: {0}
    Csv(#[from] csv::Error),

    /// invalid configuration: {0}
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error text.
pub(crate) mod text {
    pub const PORT_RANGE: &str = "SMA port must be between 1 and 4";

    pub const NO_CANDIDATES: &str = "no ocp* entries in the timecard class";

    pub const EXPLICIT_MISSING: &str = "specified device path does not exist";
}
