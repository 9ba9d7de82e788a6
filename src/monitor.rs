//! Background polling of a timecard
//!
//! A [`PollingMonitor`] takes a [`StatusSnapshot`] every interval on its own
//! thread, compares it with the previous one and calls the registered
//! [`Reactions`]. Reactions run synchronously on the polling thread, scalar
//! transitions first and the full snapshot last, so a slow reaction delays
//! the next tick.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use timecard::{
//!     config::Config,
//!     monitor::{PollingMonitor, Reactions},
//!     status::StatusAggregator,
//!     system::class::timecard::Timecard,
//! };
//!
//! let config = Config::load()?;
//! let dev = Timecard::from_config(&config)?;
//! let aggregator = Arc::new(StatusAggregator::from_config(dev, &config));
//! let monitor = PollingMonitor::new(aggregator, config)?;
//! monitor.start(Reactions::new().on_clock_source_changed(|old, new| {
//!     println!("clock source {old:?} -> {new:?}");
//! }))?;
//! // ...
//! let _ = monitor.stop();
//! # Ok::<(), timecard::error::Error>(())
//! ```
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    config::Config,
    error::{Error, Result},
    status::{StatusAggregator, StatusSnapshot},
    system::class::Device,
};

type StatusFn = Box<dyn FnMut(&StatusSnapshot) + Send>;
type ClockSourceFn = Box<dyn FnMut(Option<&str>, Option<&str>) + Send>;
type SyncFn = Box<dyn FnMut(Option<bool>, Option<bool>) + Send>;
type HealthFn = Box<dyn FnMut(bool, bool) + Send>;
type ErrorFn = Box<dyn FnMut(&Error) + Send>;

/// Kinds of event a monitor dispatches
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusUpdate,
    ClockSourceChanged,
    SyncChanged,
    HealthChanged,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StatusUpdate => "status-update",
            Self::ClockSourceChanged => "clock-source-changed",
            Self::SyncChanged => "sync-changed",
            Self::HealthChanged => "health-changed",
            Self::Error => "error",
        })
    }
}

/// Callbacks for a monitoring run, one optional slot per [`EventKind`]
///
/// Unregistered kinds are simply not dispatched.
#[derive(Default)]
pub struct Reactions {
    status_update: Option<StatusFn>,
    clock_source_changed: Option<ClockSourceFn>,
    sync_changed: Option<SyncFn>,
    health_changed: Option<HealthFn>,
    error: Option<ErrorFn>,
}

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called every tick with the full snapshot
    pub fn on_status_update<F>(mut self, f: F) -> Self
    where
        F: FnMut(&StatusSnapshot) + Send + 'static,
    {
        self.status_update = Some(Box::new(f));
        self
    }

    /// Called with `(old, new)` when the selected clock source changes.
    ///
    /// [`None`] means the attribute doesn't exist.
    pub fn on_clock_source_changed<F>(mut self, f: F) -> Self
    where
        F: FnMut(Option<&str>, Option<&str>) + Send + 'static,
    {
        self.clock_source_changed = Some(Box::new(f));
        self
    }

    /// Called with `(old, new)` when GNSS synchronization changes.
    ///
    /// [`None`] means it couldn't be determined.
    pub fn on_sync_changed<F>(mut self, f: F) -> Self
    where
        F: FnMut(Option<bool>, Option<bool>) + Send + 'static,
    {
        self.sync_changed = Some(Box::new(f));
        self
    }

    /// Called with `(old, new)` when overall health changes
    pub fn on_health_changed<F>(mut self, f: F) -> Self
    where
        F: FnMut(bool, bool) + Send + 'static,
    {
        self.health_changed = Some(Box::new(f));
        self
    }

    /// Called with the monitor's own errors, such as a snapshot timeout
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Error) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::StatusUpdate => self.status_update.is_some(),
            EventKind::ClockSourceChanged => self.clock_source_changed.is_some(),
            EventKind::SyncChanged => self.sync_changed.is_some(),
            EventKind::HealthChanged => self.health_changed.is_some(),
            EventKind::Error => self.error.is_some(),
        }
    }
}

impl fmt::Debug for Reactions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = [
            EventKind::StatusUpdate,
            EventKind::ClockSourceChanged,
            EventKind::SyncChanged,
            EventKind::HealthChanged,
            EventKind::Error,
        ];
        f.debug_set()
            .entries(kinds.iter().filter(|k| self.is_registered(**k)))
            .finish()
    }
}

/// Lifecycle of a [`PollingMonitor`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    /// Stop was requested but the polling thread hasn't exited yet
    Stopping,
}

/// How [`PollingMonitor::stop`] went
#[must_use]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// The polling thread exited
    Joined,
    /// Nothing was running
    AlreadyIdle,
    /// The join timeout elapsed, the polling thread may still be finishing
    /// its current tick.
    TimedOut,
}

#[derive(Debug, Default)]
struct Flags {
    stop: bool,
    finished: bool,
}

/// Stop request and exit notification for one run
#[derive(Debug, Default)]
struct Signal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl Signal {
    fn request_stop(&self) {
        self.flags.lock().stop = true;
        self.cond.notify_all();
    }

    fn stop_requested(&self) -> bool {
        self.flags.lock().stop
    }

    fn finish(&self) {
        self.flags.lock().finished = true;
        self.cond.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.flags.lock().finished
    }

    /// Sleep for `dur` or until stop is requested. Returns whether it was.
    fn sleep(&self, dur: Duration) -> bool {
        self.wait(dur, |f| f.stop)
    }

    /// Wait up to `timeout` for the run to exit. Returns whether it did.
    fn wait_finished(&self, timeout: Duration) -> bool {
        self.wait(timeout, |f| f.finished)
    }

    fn wait(&self, timeout: Duration, done: impl Fn(&Flags) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !done(&flags) {
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        done(&flags)
    }
}

/// Marks the run finished however the polling thread exits
struct FinishOnDrop(Arc<Signal>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

#[derive(Debug, Default)]
struct Shared {
    latest: Mutex<Option<Arc<StatusSnapshot>>>,
    ticks: AtomicU64,
}

#[derive(Debug)]
struct Run {
    signal: Arc<Signal>,
    handle: JoinHandle<()>,
}

/// Polls a [`StatusAggregator`] on a background thread
///
/// At most one polling thread runs per monitor.
#[derive(Debug)]
pub struct PollingMonitor {
    aggregator: Arc<StatusAggregator>,
    config: Config,
    shared: Arc<Shared>,
    run: Mutex<Option<Run>>,
}

impl PollingMonitor {
    /// Monitor for `aggregator`, using the interval and bounds in `config`.
    ///
    /// # Errors
    ///
    /// - If `config` fails [`Config::validate`]
    pub fn new(aggregator: Arc<StatusAggregator>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            aggregator,
            config,
            shared: Arc::default(),
            run: Mutex::new(None),
        })
    }

    pub fn aggregator(&self) -> &Arc<StatusAggregator> {
        &self.aggregator
    }

    /// Start polling, dispatching to `reactions`.
    ///
    /// Returns `false`, and drops `reactions`, if already running. That's
    /// logged, not an error.
    ///
    /// # Errors
    ///
    /// - If the polling thread couldn't be spawned
    pub fn start(&self, reactions: Reactions) -> Result<bool> {
        let mut run = self.run.lock();
        if let Some(current) = run.as_ref() {
            if !current.signal.is_finished() {
                warn!("{}", Error::MonitorAlreadyRunning);
                return Ok(false);
            }
        }
        if let Some(old) = run.take() {
            // Already finished, joining doesn't block
            let _ = old.handle.join();
        }

        let interval = self.config.clamped_interval();
        if interval != self.config.interval {
            warn!(
                configured = ?self.config.interval,
                using = ?interval,
                "polling interval clamped"
            );
        }
        self.shared.ticks.store(0, Ordering::SeqCst);

        let signal = Arc::new(Signal::default());
        let worker = Worker {
            aggregator: self.aggregator.clone(),
            reactions,
            signal: signal.clone(),
            shared: self.shared.clone(),
            interval,
            snapshot_timeout: self.config.snapshot_timeout,
            max_iterations: self.config.max_iterations,
            pending: None,
            previous: None,
        };
        let span = info_span!("monitor", device = %self.aggregator.device().path().display());
        let handle = thread::Builder::new()
            .name("timecard-monitor".into())
            .spawn(move || worker.run(span))?;
        *run = Some(Run { signal, handle });
        Ok(true)
    }

    /// Stop polling and wait up to the join timeout for the thread to exit.
    ///
    /// Calling this while idle does nothing.
    pub fn stop(&self) -> Shutdown {
        let signal = match self.run.lock().as_ref() {
            Some(run) => run.signal.clone(),
            None => return Shutdown::AlreadyIdle,
        };
        let was_finished = signal.is_finished();
        signal.request_stop();

        if !signal.wait_finished(self.config.join_timeout) {
            warn!(
                timeout = ?self.config.join_timeout,
                "monitor thread did not exit in time, it may still be finishing"
            );
            return Shutdown::TimedOut;
        }

        let mut run = self.run.lock();
        if run.as_ref().map_or(false, |r| Arc::ptr_eq(&r.signal, &signal)) {
            if let Some(run) = run.take() {
                if run.handle.join().is_err() {
                    error!("monitor thread panicked");
                }
            }
        }
        if was_finished {
            Shutdown::AlreadyIdle
        } else {
            info!("monitor stopped");
            Shutdown::Joined
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.run.lock().as_ref() {
            None => MonitorState::Idle,
            Some(run) if run.signal.is_finished() => MonitorState::Idle,
            Some(run) if run.signal.stop_requested() => MonitorState::Stopping,
            Some(_) => MonitorState::Running,
        }
    }

    /// Most recent snapshot, if any tick has completed
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.shared.latest.lock().clone()
    }

    /// Completed ticks of the current, or last, run
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut() {
            run.signal.request_stop();
        }
    }
}

/// State owned by the polling thread
struct Worker {
    aggregator: Arc<StatusAggregator>,
    reactions: Reactions,
    signal: Arc<Signal>,
    shared: Arc<Shared>,
    interval: Duration,
    snapshot_timeout: Duration,
    max_iterations: u64,
    /// Snapshot still being taken after its timeout
    pending: Option<Receiver<StatusSnapshot>>,
    previous: Option<Arc<StatusSnapshot>>,
}

impl Worker {
    fn run(mut self, span: Span) {
        let _span = span.entered();
        let _finish = FinishOnDrop(self.signal.clone());
        info!(interval = ?self.interval, reactions = ?self.reactions, "monitor started");

        let mut tick = 0;
        while !self.signal.stop_requested() {
            tick += 1;
            self.tick();
            self.shared.ticks.store(tick, Ordering::SeqCst);
            if tick >= self.max_iterations {
                info!(iterations = tick, "iteration ceiling reached, monitor finished");
                break;
            }
            if self.signal.sleep(self.interval) {
                break;
            }
        }
        debug!(ticks = tick, "monitor exiting");
    }

    fn tick(&mut self) {
        let snapshot = match self.snapshot() {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.report(&e);
                return;
            }
        };
        if let Some(previous) = self.previous.take() {
            self.transitions(&previous, &snapshot);
        }
        if let Some(f) = &mut self.reactions.status_update {
            f(&snapshot);
        }
        *self.shared.latest.lock() = Some(snapshot.clone());
        self.previous = Some(snapshot);
    }

    /// Take a snapshot on a helper thread, bounded by the snapshot timeout.
    ///
    /// A snapshot that times out is waited on again next tick instead of
    /// starting another.
    fn snapshot(&mut self) -> Result<StatusSnapshot> {
        let rx = match self.pending.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::sync_channel(1);
                let aggregator = self.aggregator.clone();
                thread::Builder::new()
                    .name("timecard-snapshot".into())
                    .spawn(move || {
                        let _ = tx.send(aggregator.snapshot());
                    })?;
                rx
            }
        };
        match rx.recv_timeout(self.snapshot_timeout) {
            Ok(snapshot) => Ok(snapshot),
            Err(RecvTimeoutError::Timeout) => {
                self.pending = Some(rx);
                Err(Error::SnapshotTimeout(self.snapshot_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "snapshot thread exited without a result",
            ))),
        }
    }

    fn report(&mut self, e: &Error) {
        match &mut self.reactions.error {
            Some(f) => f(e),
            None => warn!(error = %e, "monitor error dropped"),
        }
    }

    /// Dispatch changed scalar fields. Fields with a read error on either
    /// side aren't compared.
    fn transitions(&mut self, previous: &StatusSnapshot, current: &StatusSnapshot) {
        let (old, new) = (&previous.clock_status, &current.clock_status);

        if !old.source.is_error() && !new.source.is_error() && old.source != new.source {
            debug!(old = ?old.source.as_str(), new = ?new.source.as_str(), "clock source changed");
            if let Some(f) = &mut self.reactions.clock_source_changed {
                f(old.source.as_str(), new.source.as_str());
            }
        }

        if !old.gnss_sync.is_error()
            && !new.gnss_sync.is_error()
            && old.synchronized != new.synchronized
        {
            debug!(old = ?old.synchronized, new = ?new.synchronized, "sync changed");
            if let Some(f) = &mut self.reactions.sync_changed {
                f(old.synchronized.as_bool(), new.synchronized.as_bool());
            }
        }

        if previous.healthy() != current.healthy() {
            info!(healthy = current.healthy(), "health changed");
            if let Some(f) = &mut self.reactions.health_changed {
                f(previous.healthy(), current.healthy());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sysfs::attribute::{self, AttributeStore, ReadLimits, SysfsStore},
        system::class::timecard::Timecard,
        util::fixture,
    };
    use anyhow::Result;
    use std::{fs, path::Path};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn config() -> Config {
        Config {
            interval: INTERVAL,
            ..Default::default()
        }
    }

    fn monitor_with(dev: Timecard, config: Config) -> Result<PollingMonitor> {
        let aggregator = Arc::new(StatusAggregator::from_config(dev, &config));
        Ok(PollingMonitor::new(aggregator, config)?)
    }

    fn monitor(dir: &TempDir, config: Config) -> Result<PollingMonitor> {
        monitor_with(Timecard::open(dir.path(), config.read_limits())?, config)
    }

    /// Poll `cond` until it holds, or fail after a few seconds
    fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Makes reading one attribute slow
    #[derive(Debug)]
    struct Slow {
        inner: SysfsStore,
        attribute: &'static str,
        delay: Duration,
    }

    impl AttributeStore for Slow {
        fn root(&self) -> &Path {
            self.inner.root()
        }

        fn limits(&self) -> ReadLimits {
            self.inner.limits()
        }

        fn read_with(&self, name: &str, limits: ReadLimits) -> attribute::Result<String> {
            if name == self.attribute {
                thread::sleep(self.delay);
            }
            self.inner.read_with(name, limits)
        }

        fn write(&self, name: &str, value: &str) -> attribute::Result<()> {
            self.inner.write(name, value)
        }

        fn exists(&self, name: &str) -> bool {
            self.inner.exists(name)
        }

        fn list(&self, dir: &str) -> attribute::Result<Vec<String>> {
            self.inner.list(dir)
        }

        fn subdirs(&self, dir: &str) -> attribute::Result<Vec<String>> {
            self.inner.subdirs(dir)
        }
    }

    fn slow(dir: &TempDir) -> Result<Timecard> {
        Ok(Timecard::with_store(Arc::new(Slow {
            inner: SysfsStore::new(dir.path(), ReadLimits::default()),
            attribute: "clock_status_drift",
            delay: Duration::from_millis(300),
        }))?)
    }

    #[test]
    fn five_ticks() -> Result<()> {
        let dir = fixture::standard()?;
        let monitor = monitor(&dir, config())?;
        let updates = Arc::new(AtomicU64::new(0));
        let counter = updates.clone();
        assert!(monitor.start(Reactions::new().on_status_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))?);
        assert_eq!(monitor.state(), MonitorState::Running);

        wait_for("5 ticks", || monitor.ticks() >= 5);
        let start = Instant::now();
        assert_eq!(monitor.stop(), Shutdown::Joined);
        assert!(start.elapsed() < INTERVAL * 5 + config().join_timeout);

        let updates = updates.load(Ordering::SeqCst);
        assert!((5..=6).contains(&updates), "{updates} status updates");
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(monitor.latest().is_some());
        Ok(())
    }

    #[test]
    fn clock_source_transition() -> Result<()> {
        let dir = fixture::standard()?;
        let monitor = monitor(&dir, config())?;
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sources = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (changes.clone(), sources.clone());
        let reactions = Reactions::new()
            .on_clock_source_changed(move |old, new| {
                c.lock().push((old.map(str::to_owned), new.map(str::to_owned)));
            })
            .on_status_update(move |snap| {
                s.lock().push(snap.clock_source().map(str::to_owned));
            });
        assert!(monitor.start(reactions)?);

        wait_for("first tick", || monitor.ticks() >= 1);
        // Replace atomically so no tick sees a truncated file
        fixture::write(dir.path(), "clock_source.new", "GNSS\n")?;
        fs::rename(dir.path().join("clock_source.new"), dir.path().join("clock_source"))?;
        let seen = monitor.ticks();
        wait_for("two more ticks", || monitor.ticks() >= seen + 2);
        assert_eq!(monitor.stop(), Shutdown::Joined);

        assert_eq!(
            *changes.lock(),
            [(Some("PPS".to_owned()), Some("GNSS".to_owned()))]
        );
        let sources = sources.lock();
        assert_eq!(sources.first(), Some(&Some("PPS".to_owned())));
        assert_eq!(sources.last(), Some(&Some("GNSS".to_owned())));
        Ok(())
    }

    #[test]
    fn sync_and_health_transitions() -> Result<()> {
        let dir = fixture::standard()?;
        let monitor = monitor(&dir, config())?;
        let sync = Arc::new(Mutex::new(Vec::new()));
        let health = Arc::new(Mutex::new(Vec::new()));
        let (s, h) = (sync.clone(), health.clone());
        let reactions = Reactions::new()
            .on_sync_changed(move |old, new| s.lock().push((old, new)))
            .on_health_changed(move |old, new| h.lock().push((old, new)));
        assert!(reactions.is_registered(EventKind::SyncChanged));
        assert!(!reactions.is_registered(EventKind::Error));
        assert!(monitor.start(reactions)?);

        wait_for("first tick", || monitor.ticks() >= 1);
        fixture::write(dir.path(), "gnss_sync.new", "LOST @ 12:00\n")?;
        fs::rename(dir.path().join("gnss_sync.new"), dir.path().join("gnss_sync"))?;
        wait_for("sync change", || !sync.lock().is_empty());
        assert_eq!(monitor.stop(), Shutdown::Joined);

        assert_eq!(*sync.lock(), [(Some(true), Some(false))]);
        assert_eq!(*health.lock(), [(true, false)]);
        Ok(())
    }

    #[test]
    fn snapshot_timeout_reported() -> Result<()> {
        let dir = fixture::standard()?;
        let config = Config {
            snapshot_timeout: Duration::from_millis(50),
            ..config()
        };
        let monitor = monitor_with(slow(&dir)?, config)?;
        let errors = Arc::new(Mutex::new(Vec::new()));
        let updates = Arc::new(AtomicU64::new(0));
        let (e, u) = (errors.clone(), updates.clone());
        assert!(monitor.start(
            Reactions::new()
                .on_error(move |err| e.lock().push(err.to_string()))
                .on_status_update(move |_| {
                    u.fetch_add(1, Ordering::SeqCst);
                })
        )?);

        wait_for("a timeout and a late snapshot", || {
            !errors.lock().is_empty() && updates.load(Ordering::SeqCst) >= 1
        });
        assert_eq!(monitor.state(), MonitorState::Running);
        assert_eq!(monitor.stop(), Shutdown::Joined);
        assert!(errors.lock()[0].starts_with("status snapshot timed out"));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn unhandled_error_logged() -> Result<()> {
        let dir = fixture::standard()?;
        let config = Config {
            snapshot_timeout: Duration::from_millis(50),
            ..config()
        };
        let monitor = monitor_with(slow(&dir)?, config)?;
        assert!(monitor.start(Reactions::new())?);
        wait_for("a tick", || monitor.ticks() >= 1);
        assert_eq!(monitor.stop(), Shutdown::Joined);
        assert!(logs_contain("monitor error dropped"));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn already_running() -> Result<()> {
        let dir = fixture::standard()?;
        let monitor = monitor(&dir, config())?;
        assert!(monitor.start(Reactions::new())?);
        assert!(!monitor.start(Reactions::new())?);
        assert!(logs_contain("monitor is already running"));
        assert_eq!(monitor.stop(), Shutdown::Joined);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let dir = fixture::standard()?;
        let monitor = monitor(&dir, config())?;
        assert_eq!(monitor.stop(), Shutdown::AlreadyIdle);

        assert!(monitor.start(Reactions::new())?);
        assert_eq!(monitor.stop(), Shutdown::Joined);
        assert_eq!(monitor.stop(), Shutdown::AlreadyIdle);
        assert_eq!(monitor.state(), MonitorState::Idle);

        assert!(monitor.start(Reactions::new())?);
        assert_eq!(monitor.state(), MonitorState::Running);
        assert_eq!(monitor.stop(), Shutdown::Joined);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn iteration_ceiling() -> Result<()> {
        let dir = fixture::standard()?;
        let config = Config {
            max_iterations: 2,
            ..config()
        };
        let monitor = monitor(&dir, config)?;
        assert!(monitor.start(Reactions::new())?);
        wait_for("the run to finish", || monitor.state() == MonitorState::Idle);
        assert_eq!(monitor.ticks(), 2);
        assert!(logs_contain("iteration ceiling reached"));
        assert_eq!(monitor.stop(), Shutdown::AlreadyIdle);
        Ok(())
    }

    #[test]
    fn ceiling_skips_final_sleep() -> Result<()> {
        let dir = fixture::standard()?;
        let config = Config {
            interval: Duration::from_secs(3600),
            max_iterations: 1,
            ..config()
        };
        let monitor = monitor(&dir, config)?;
        assert!(monitor.start(Reactions::new())?);
        wait_for("the run to finish", || monitor.state() == MonitorState::Idle);
        assert_eq!(monitor.ticks(), 1);
        assert_eq!(monitor.stop(), Shutdown::AlreadyIdle);
        Ok(())
    }

    #[test]
    fn slow_reaction_times_out_stop() -> Result<()> {
        let dir = fixture::standard()?;
        let config = Config {
            join_timeout: Duration::from_millis(100),
            ..config()
        };
        let monitor = monitor(&dir, config)?;
        let entered = Arc::new(AtomicU64::new(0));
        let e = entered.clone();
        assert!(monitor.start(Reactions::new().on_status_update(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(800));
        }))?);

        wait_for("the reaction to start", || entered.load(Ordering::SeqCst) >= 1);
        assert_eq!(monitor.stop(), Shutdown::TimedOut);
        assert_eq!(monitor.state(), MonitorState::Stopping);
        assert!(!monitor.start(Reactions::new())?);

        wait_for("the slow tick to end", || monitor.state() == MonitorState::Idle);
        assert_eq!(monitor.stop(), Shutdown::AlreadyIdle);
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn rejects_invalid_config() -> Result<()> {
        let dir = fixture::standard()?;
        let dev = Timecard::open(dir.path(), ReadLimits::default())?;
        assert_eq!(dev.kernel_name().map(|n| n.starts_with("ocp")), Some(true));
        let config = Config {
            join_timeout: Duration::ZERO,
            ..config()
        };
        assert!(monitor_with(dev, config).is_err());
        Ok(())
    }
}
