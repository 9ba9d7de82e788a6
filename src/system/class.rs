//! Abstractions for handling the `timecard` device class
//!
//! A "class" is a specific kernel subsystem. The `ptp_ocp` driver registers
//! every unit it binds to under `/sys/class/timecard` as `ocpN`, a symlink to
//! the real device directory.
//!
//! See the [sysfs rules][1] for details
//!
//! [1]: https://www.kernel.org/doc/html/latest/admin-guide/sysfs-rules.html
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use self::imp::Sealed;
use crate::util::UNIT_PREFIX;

pub mod timecard;

mod imp {
    use super::*;

    pub trait Sealed {}

    impl Sealed for timecard::Timecard {}
}

/// A kernel "Device" backing one timecard
pub trait Device: Sealed {
    /// Full path to the device
    ///
    /// # Example
    ///
    /// `/sys/class/timecard/ocp0`
    fn path(&self) -> &Path;

    /// Kernel name of the device.
    ///
    /// Identical to the last component of [`Device::path`]
    ///
    /// # Example
    ///
    /// `ocp0`
    fn kernel_name(&self) -> Option<&str> {
        self.path().file_name().and_then(|n| n.to_str())
    }

    /// Name of the device the symlink `name` in the device directory points
    /// at.
    ///
    /// Returns [`None`] if there is no such link.
    ///
    /// # Example
    ///
    /// `ptp` → `ptp3`, `pps` → `pps1`
    fn link(&self, name: &str) -> Option<String> {
        self.path()
            .join(name)
            .read_link()
            .ok()
            .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_owned))
    }
}

/// Every `ocp*` directory in `class`, sorted.
///
/// Entries that can't be inspected are logged and skipped, a single broken
/// entry doesn't hide the rest.
///
/// # Errors
///
/// - If `class` itself couldn't be listed
pub fn candidates(class: &Path) -> io::Result<Vec<PathBuf>> {
    let mut v = Vec::new();
    for entry in fs::read_dir(class)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(class = %class.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let name = entry.file_name();
        if !name.to_str().map_or(false, |n| n.starts_with(UNIT_PREFIX)) {
            continue;
        }
        let path = entry.path();
        // Follows the class symlink
        match fs::metadata(&path) {
            Ok(m) if m.is_dir() => v.push(path),
            Ok(_) => debug!(path = %path.display(), "not a directory"),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping inaccessible candidate"),
        }
    }
    v.sort_unstable();
    Ok(v)
}
