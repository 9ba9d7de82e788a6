//! Bounded, failure tolerant access to single attributes.
use crate::{
    error::AttributeError,
    util::{DEFAULT_MAX_ATTRIBUTE_SIZE, DEFAULT_READ_TIMEOUT},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::Debug,
    fs::{self, File, OpenOptions},
    io::{self, prelude::*},
    path::{Component, Path, PathBuf},
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub type Result<T, E = AttributeError> = std::result::Result<T, E>;

/// Bounds applied to a single attribute operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadLimits {
    /// Maximum wall clock time for the operation.
    pub timeout: Duration,

    /// Maximum content size, in bytes.
    pub max_size: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READ_TIMEOUT,
            max_size: DEFAULT_MAX_ATTRIBUTE_SIZE,
        }
    }
}

/// Single attribute access against a device root.
///
/// Attribute names are relative to the root and may be path qualified, like
/// `gen3/period`. Names that would escape the root are treated as absent.
///
/// Implementations must never block past [`ReadLimits::timeout`] and must
/// never create attributes.
pub trait AttributeStore: Send + Sync + Debug {
    /// Directory backing this store
    fn root(&self) -> &Path;

    /// Default bounds used by [`AttributeStore::read`]
    fn limits(&self) -> ReadLimits;

    /// Read `name`, trimmed of surrounding whitespace, within `limits`.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::NotFound`] if `name` doesn't exist or isn't a
    ///   regular file
    /// - [`AttributeError::Access`] if it exists but couldn't be read or
    ///   wasn't UTF-8
    /// - [`AttributeError::Timeout`] and [`AttributeError::TooLarge`] if a
    ///   bound was exceeded
    fn read_with(&self, name: &str, limits: ReadLimits) -> Result<String>;

    /// Overwrite the whole value of the existing attribute `name`.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::NotFound`] if `name` doesn't exist
    /// - [`AttributeError::Access`] if it couldn't be written
    /// - [`AttributeError::Timeout`]
    fn write(&self, name: &str, value: &str) -> Result<()>;

    /// Whether `name` exists and is a regular file.
    ///
    /// Permission errors count as `false`.
    fn exists(&self, name: &str) -> bool;

    /// Names of the attribute files directly inside the directory `dir`,
    /// sorted.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::NotFound`] if `dir` isn't a directory
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Names of the subdirectories directly inside `dir`, sorted.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::NotFound`] if `dir` isn't a directory
    fn subdirs(&self, dir: &str) -> Result<Vec<String>>;

    /// Read `name` with the default [`AttributeStore::limits`]
    fn read(&self, name: &str) -> Result<String> {
        self.read_with(name, self.limits())
    }
}

/// [`AttributeStore`] backed by the real filesystem.
#[derive(Debug, Clone)]
pub struct SysfsStore {
    root: PathBuf,
    limits: ReadLimits,
    pending: Pending,
}

impl SysfsStore {
    pub fn new<P: AsRef<Path>>(root: P, limits: ReadLimits) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            limits,
            pending: Pending::default(),
        }
    }

    /// Full path of `name`, or [`None`] if it would leave the root.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        if name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// Full path of the regular file `name`.
    fn file(&self, name: &str) -> Result<PathBuf> {
        self.resolve(name)
            .filter(|p| is_file(p))
            .ok_or_else(|| AttributeError::NotFound(name.into()))
    }
}

impl AttributeStore for SysfsStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn limits(&self) -> ReadLimits {
        self.limits
    }

    fn read_with(&self, name: &str, limits: ReadLimits) -> Result<String> {
        let path = self.file(name).map_err(|e| {
            debug!(attribute = name, "attribute does not exist");
            e
        })?;
        let value = self
            .pending
            .run(name, path.clone(), limits.timeout, move || {
                read_limited(&path, limits.max_size)
            })
        .and_then(|r| match r {
            Ok(v) => Ok(v),
            Err(Limited::Io(source)) => Err(AttributeError::Access {
                name: name.into(),
                source,
            }),
            Err(Limited::TooLarge) => Err(AttributeError::TooLarge {
                name: name.into(),
                limit: limits.max_size,
            }),
        });
        match value {
            Ok(v) => {
                debug!(attribute = name, value = %v, "read attribute");
                Ok(v)
            }
            Err(e) => {
                warn!(attribute = name, error = %e, "failed to read attribute");
                Err(e)
            }
        }
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        let path = self.file(name)?;
        let data = value.to_owned();
        let timeout = self.limits.timeout;
        self.pending.run(name, path.clone(), timeout, move || -> io::Result<()> {
            // No `create`, the kernel owns every attribute.
            let mut f = OpenOptions::new().write(true).truncate(true).open(path)?;
            f.write_all(data.as_bytes())
        })?
        .map_err(|source| AttributeError::Access {
            name: name.into(),
            source,
        })?;
        info!(attribute = name, value, "wrote attribute");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map_or(false, |p| is_file(&p))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.entries(dir, |t| t.is_file())
    }

    fn subdirs(&self, dir: &str) -> Result<Vec<String>> {
        self.entries(dir, |t| t.is_dir())
    }
}

impl SysfsStore {
    /// Sorted names directly inside `dir` whose file type passes `keep`
    fn entries(&self, dir: &str, keep: fn(&fs::FileType) -> bool) -> Result<Vec<String>> {
        let path = self
            .resolve(dir)
            .filter(|p| p.is_dir())
            .ok_or_else(|| AttributeError::NotFound(dir.into()))?;
        let timeout = self.limits.timeout;
        self.pending
            .run(dir, path.clone(), timeout, move || -> io::Result<Vec<String>> {
                let mut names = Vec::new();
                let walk = WalkDir::new(path)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name();
                for entry in walk {
                    let entry = entry.map_err(io::Error::from)?;
                    if !keep(&entry.file_type()) {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_owned());
                    }
                }
                Ok(names)
            })?
            .map_err(|source| AttributeError::Access {
                name: dir.into(),
                source,
            })
    }
}

/// Why [`read_limited`] failed
enum Limited {
    Io(io::Error),
    TooLarge,
}

impl From<io::Error> for Limited {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read at most `max` bytes of UTF-8 from `path`, trimmed.
fn read_limited(path: &Path, max: usize) -> Result<String, Limited> {
    let mut buf = Vec::new();
    File::open(path)?
        .take(max as u64 + 1)
        .read_to_end(&mut buf)?;
    if buf.len() > max {
        return Err(Limited::TooLarge);
    }
    let s = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(s.trim().to_owned())
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).map_or(false, |m| m.is_file())
}

/// Operations still running on a worker thread, by path
#[derive(Debug, Clone, Default)]
pub(crate) struct Pending(Arc<Mutex<HashMap<PathBuf, (Instant, Duration)>>>);

impl Pending {
    /// [`bounded`], unless an earlier operation on `path` is still running
    /// past its own timeout. Then this fails with
    /// [`AttributeError::Timeout`] without starting another worker, so a
    /// stuck attribute holds at most one thread.
    pub(crate) fn run<T, F>(&self, name: &str, path: PathBuf, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let release = {
            let mut map = self.0.lock();
            let stuck = map
                .get(&path)
                .map(|(since, limit)| since.elapsed() >= *limit);
            match stuck {
                Some(true) => {
                    debug!(attribute = name, "earlier operation still stuck");
                    return Err(AttributeError::Timeout {
                        name: name.into(),
                        timeout,
                    });
                }
                Some(false) => None,
                None => {
                    map.insert(path.clone(), (Instant::now(), timeout));
                    Some(Release {
                        map: self.0.clone(),
                        path,
                    })
                }
            }
        };
        bounded(name, timeout, move || {
            let _release = release;
            f()
        })
    }

    fn contains(&self, path: &Path) -> bool {
        self.0.lock().contains_key(path)
    }
}

/// Forgets a pending path when the worker finishes
struct Release {
    map: Arc<Mutex<HashMap<PathBuf, (Instant, Duration)>>>,
    path: PathBuf,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.map.lock().remove(&self.path);
    }
}

/// Run `f` on a worker thread and wait at most `timeout` for it.
///
/// On timeout the worker is left to finish on its own; its result is
/// dropped.
pub(crate) fn bounded<T, F>(name: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("timecard-attr".into())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|source| AttributeError::Access {
            name: name.into(),
            source,
        })?;
    match rx.recv_timeout(timeout) {
        Ok(v) => Ok(v),
        Err(RecvTimeoutError::Timeout) => Err(AttributeError::Timeout {
            name: name.into(),
            timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(AttributeError::Access {
            name: name.into(),
            source: io::Error::new(io::ErrorKind::Other, "attribute worker panicked"),
        }),
    }
}
