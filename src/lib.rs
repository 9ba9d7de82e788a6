//! Access to OCP timecards through the `ptp_ocp` sysfs interface
//!
//! # Implementation details
//!
//! The driver exposes each unit as a directory of small text attributes under
//! `/sys/class/timecard`, so this library requires sysfs to exist.
//!
//! Which attributes exist depends on the hardware build and driver version.
//! Nothing here assumes an optional attribute is present, see
//! [`capability`].
//!
//! Every attribute read is bounded in time and size. Background monitoring
//! never fails because of a single attribute, instead the failure is recorded
//! in the [`status::StatusSnapshot`].
//!
//! This library logs through [`tracing`] and never installs a subscriber.
pub mod capability;
pub mod config;
pub mod error;
pub mod monitor;
pub mod status;
pub mod sysfs;
pub mod system;
pub mod util;
