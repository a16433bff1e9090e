//! File growth notification for follow mode.
//!
//! A [`FileWatcher`] hands out one [`WatchHandle`] per followed stream.
//! Streams wait on their handle between rescans; a wake-up only means
//! "look again", so spurious and coalesced wake-ups are harmless. Every wait
//! is bounded by a timeout, which makes a lost or delayed OS event cost at
//! most one poll interval.
//!
//! Two backends exist:
//! - [`NotifyWatcher`]: OS notifications via the `notify` crate. The watch
//!   is shared per canonical path and reference counted; a backend error
//!   degrades every handle to polling.
//! - [`PollingWatcher`]: periodic size checks only.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::{EngineConfig, WatchBackend};
use crate::error::WatchError;

/// Source of per-file growth notifications.
pub trait FileWatcher: Send + Sync + fmt::Debug {
    /// Starts watching `path` and returns the handle a stream waits on.
    fn register(&self, path: &Path) -> Result<WatchHandle, WatchError>;

    /// Stops delivering notifications for `handle`. Calling this more than
    /// once is a no-op.
    fn unregister(&self, handle: &WatchHandle) {
        handle.unregister();
    }

    /// Number of live registrations.
    fn registrations(&self) -> usize;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Result of waiting on a [`WatchHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The file changed, or may have; rescan it.
    Growth,
    /// Nothing was observed before the timeout.
    Timeout,
}

/// Removes a registration from its owning watcher.
trait Release: Send + Sync {
    fn release(&self, id: u64, path: &Path);
}

#[derive(Debug, Default)]
struct WatchSignal {
    notify: Notify,
    registered: AtomicBool,
    degraded: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitMode {
    Events,
    Polling,
}

/// One stream's registration with a [`FileWatcher`].
///
/// Dropping the handle unregisters it.
pub struct WatchHandle {
    id: u64,
    path: PathBuf,
    signal: Arc<WatchSignal>,
    mode: WaitMode,
    poll_interval: Duration,
    max_failures: u32,
    last_len: AtomicU64,
    failures: AtomicU32,
    owner: Weak<dyn Release>,
}

impl WatchHandle {
    fn new(
        id: u64,
        path: PathBuf,
        signal: Arc<WatchSignal>,
        mode: WaitMode,
        settings: PollSettings,
        owner: Weak<dyn Release>,
    ) -> Self {
        signal.registered.store(true, Ordering::Release);
        let last_len = std::fs::metadata(&path).map_or(0, |m| m.len());
        Self {
            id,
            path,
            signal,
            mode,
            poll_interval: settings.interval,
            max_failures: settings.max_failures,
            last_len: AtomicU64::new(last_len),
            failures: AtomicU32::new(0),
            owner,
        }
    }

    /// Registration id, unique within its watcher.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The watched path as registered.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the handle still receives notifications.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.signal.registered.load(Ordering::Acquire)
    }

    /// Whether this handle is served by size polling rather than OS events.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.mode == WaitMode::Polling || self.signal.degraded.load(Ordering::Acquire)
    }

    /// Releases the registration. Idempotent.
    pub fn unregister(&self) {
        if self.signal.registered.swap(false, Ordering::AcqRel) {
            if let Some(owner) = self.owner.upgrade() {
                owner.release(self.id, &self.path);
            }
            self.signal.notify.notify_waiters();
            debug!(id = self.id, path = %self.path.display(), "unregistered watch");
        }
    }

    /// Waits until the file may have grown or `timeout` elapses.
    pub async fn wait_for_growth(&self, timeout: Duration) -> Result<WaitOutcome, WatchError> {
        if !self.is_registered() {
            return Err(WatchError::Unregistered);
        }

        if self.is_polling() {
            return self.poll_once(timeout).await;
        }

        match tokio::time::timeout(timeout, self.signal.notify.notified()).await {
            Ok(()) if self.is_registered() => Ok(WaitOutcome::Growth),
            Ok(()) => Err(WatchError::Unregistered),
            Err(_) => Ok(WaitOutcome::Timeout),
        }
    }

    async fn poll_once(&self, timeout: Duration) -> Result<WaitOutcome, WatchError> {
        tokio::time::sleep(timeout.min(self.poll_interval)).await;

        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                self.failures.store(0, Ordering::Relaxed);
                let len = meta.len();
                if self.last_len.swap(len, Ordering::AcqRel) == len {
                    Ok(WaitOutcome::Timeout)
                } else {
                    Ok(WaitOutcome::Growth)
                }
            }
            // Let the stream notice the removal itself.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(WaitOutcome::Growth),
            Err(e) => {
                let attempts = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(path = %self.path.display(), attempts, error = %e, "watch poll failed");
                if attempts >= self.max_failures {
                    Err(WatchError::PollFailed {
                        path: self.path.clone(),
                        attempts,
                    })
                } else {
                    Ok(WaitOutcome::Timeout)
                }
            }
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[derive(Debug, Clone, Copy)]
struct PollSettings {
    interval: Duration,
    max_failures: u32,
}

impl PollSettings {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_failures: config.max_poll_failures.max(1),
        }
    }
}

type SignalMap = HashMap<PathBuf, Vec<(u64, Arc<WatchSignal>)>>;

struct WatchState {
    watcher: RecommendedWatcher,
    refs: HashMap<PathBuf, usize>,
}

struct NotifyShared {
    /// Serializes watch and unwatch calls. Never taken by the event callback.
    state: Mutex<WatchState>,
    signals: Arc<Mutex<SignalMap>>,
    next_id: AtomicU64,
}

impl Release for NotifyShared {
    fn release(&self, id: u64, path: &Path) {
        {
            let mut signals = self.signals.lock();
            if let Some(entries) = signals.get_mut(path) {
                entries.retain(|(entry_id, _)| *entry_id != id);
                if entries.is_empty() {
                    signals.remove(path);
                }
            }
        }

        let mut state = self.state.lock();
        let remaining = match state.refs.get_mut(path) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            state.refs.remove(path);
            if let Err(e) = state.watcher.unwatch(path) {
                debug!(path = %path.display(), error = %e, "unwatch failed");
            }
        }
    }
}

/// OS-notification watcher with per-path sharing and polling fallback.
pub struct NotifyWatcher {
    shared: Arc<NotifyShared>,
    settings: PollSettings,
}

impl NotifyWatcher {
    /// Creates the OS watcher.
    pub fn new(config: &EngineConfig) -> Result<Self, WatchError> {
        let signals: Arc<Mutex<SignalMap>> = Arc::default();
        let callback_signals = Arc::clone(&signals);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            dispatch(&callback_signals, res);
        })?;

        Ok(Self {
            shared: Arc::new(NotifyShared {
                state: Mutex::new(WatchState {
                    watcher,
                    refs: HashMap::new(),
                }),
                signals,
                next_id: AtomicU64::new(1),
            }),
            settings: PollSettings::from_config(config),
        })
    }

    fn owner(&self) -> Weak<dyn Release> {
        let shared: Arc<dyn Release> = self.shared.clone();
        Arc::downgrade(&shared)
    }
}

fn dispatch(signals: &Mutex<SignalMap>, res: notify::Result<Event>) {
    match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let signals = signals.lock();
            for path in &event.paths {
                if let Some(entries) = signals.get(path) {
                    for (_, signal) in entries {
                        signal.notify.notify_one();
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "watch backend error, falling back to polling");
            let signals = signals.lock();
            for (_, signal) in signals.values().flatten() {
                signal.degraded.store(true, Ordering::Release);
                signal.notify.notify_one();
            }
        }
    }
}

impl FileWatcher for NotifyWatcher {
    fn register(&self, path: &Path) -> Result<WatchHandle, WatchError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(WatchSignal::default());

        {
            let mut state = self.shared.state.lock();
            let first = !state.refs.contains_key(&canonical);
            if first {
                if let Err(e) = state.watcher.watch(&canonical, RecursiveMode::NonRecursive) {
                    warn!(path = %canonical.display(), error = %e, "watch failed, polling instead");
                    signal.degraded.store(true, Ordering::Release);
                }
            }
            if !signal.degraded.load(Ordering::Acquire) {
                *state.refs.entry(canonical.clone()).or_insert(0) += 1;
            }
        }

        let owner: Weak<dyn Release> = if signal.degraded.load(Ordering::Acquire) {
            Weak::<NotifyShared>::new()
        } else {
            self.shared
                .signals
                .lock()
                .entry(canonical.clone())
                .or_default()
                .push((id, Arc::clone(&signal)));
            self.owner()
        };

        debug!(id, path = %canonical.display(), backend = self.name(), "registered watch");
        Ok(WatchHandle::new(
            id,
            canonical,
            signal,
            WaitMode::Events,
            self.settings,
            owner,
        ))
    }

    fn registrations(&self) -> usize {
        self.shared.signals.lock().values().map(Vec::len).sum()
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

impl fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("registrations", &self.registrations())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PollingShared {
    registry: Mutex<HashMap<u64, PathBuf>>,
    next_id: AtomicU64,
}

impl Release for PollingShared {
    fn release(&self, id: u64, _path: &Path) {
        self.registry.lock().remove(&id);
    }
}

/// Watcher that detects growth by checking file size every poll interval.
pub struct PollingWatcher {
    shared: Arc<PollingShared>,
    settings: PollSettings,
}

impl PollingWatcher {
    /// Creates a polling watcher.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            shared: Arc::default(),
            settings: PollSettings::from_config(config),
        }
    }
}

impl FileWatcher for PollingWatcher {
    fn register(&self, path: &Path) -> Result<WatchHandle, WatchError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.registry.lock().insert(id, path.to_path_buf());

        let shared: Arc<dyn Release> = self.shared.clone();
        debug!(id, path = %path.display(), backend = self.name(), "registered watch");
        Ok(WatchHandle::new(
            id,
            path.to_path_buf(),
            Arc::new(WatchSignal::default()),
            WaitMode::Polling,
            self.settings,
            Arc::downgrade(&shared),
        ))
    }

    fn registrations(&self) -> usize {
        self.shared.registry.lock().len()
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

impl fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("registrations", &self.registrations())
            .field("interval", &self.settings.interval)
            .finish()
    }
}

/// Builds the watcher selected by `config`, falling back to polling when the
/// OS backend cannot be created.
pub fn from_config(config: &EngineConfig) -> Arc<dyn FileWatcher> {
    match config.watch_backend {
        WatchBackend::Poll => Arc::new(PollingWatcher::new(config)),
        WatchBackend::Notify => match NotifyWatcher::new(config) {
            Ok(watcher) => Arc::new(watcher),
            Err(e) => {
                warn!(error = %e, "notify backend unavailable, using polling");
                Arc::new(PollingWatcher::new(config))
            }
        },
    }
}
