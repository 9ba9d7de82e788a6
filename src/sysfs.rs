//! An interface to the attribute files a timecard exposes in sysfs.
//!
//! # Implementation Details
//!
//! The `ptp_ocp` driver exposes one text file per attribute, grouped into
//! per-unit directories with optional `genN`, `freqN` and `tsN`
//! subdirectories. The kernel owns these files, so they are only ever read
//! or overwritten, never created.
//!
//! Reads and writes against this interface can block on slow hardware or a
//! stuck driver, and the unit can disappear mid-session. Every operation here
//! is therefore bounded in time and size and degrades to a typed
//! [`AttributeError`][crate::error::AttributeError].
//!
//! # Stability
//!
//! Most of these attributes are undocumented outside the driver source and
//! vary between hardware builds, which is what
//! [`crate::capability`] is for.

pub mod attribute;
