//! Watches the device directory and emits typed add/remove/change events.
//!
//! The watcher resource is acquired lazily in [`DeviceEventSource::start`],
//! never at construction. When it cannot be acquired the source enters
//! poll-only mode: start still succeeds, the events channel stays open, and
//! no events are produced.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};
use crate::types::{DeviceEvent, DeviceEventKind};

use super::backend::{self, EventBackend};

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct DeviceEventSourceConfig {
    /// Directory holding the device nodes.
    pub device_dir: PathBuf,
    /// Only entries whose basename starts with this prefix are forwarded.
    pub device_prefix: String,
    pub channel_capacity: usize,
    /// Event backend to assume; `None` detects it from the environment at
    /// start.
    pub backend: Option<EventBackend>,
}

impl Default for DeviceEventSourceConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
            device_prefix: "video".to_string(),
            channel_capacity: DEFAULT_EVENT_CAPACITY,
            backend: None,
        }
    }
}

#[derive(Default)]
struct SourceState {
    watcher: Option<RecommendedWatcher>,
    events_rx: Option<mpsc::Receiver<DeviceEvent>>,
    /// Keeps the channel open in poll-only mode, where no loop holds a sender.
    idle_tx: Option<mpsc::Sender<DeviceEvent>>,
    shutdown: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
}

/// Typed event stream over the device directory.
pub struct DeviceEventSource {
    config: DeviceEventSourceConfig,
    state: Mutex<SourceState>,
    started: AtomicBool,
    events_supported: AtomicBool,
    backend: parking_lot::RwLock<Option<EventBackend>>,
    dropped_events: Arc<AtomicU64>,
}

impl fmt::Debug for DeviceEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEventSource")
            .field("device_dir", &self.config.device_dir)
            .field("device_prefix", &self.config.device_prefix)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("events_supported", &self.events_supported.load(Ordering::Relaxed))
            .field("backend", &*self.backend.read())
            .finish()
    }
}

impl DeviceEventSource {
    pub fn new(config: DeviceEventSourceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SourceState::default()),
            started: AtomicBool::new(false),
            events_supported: AtomicBool::new(false),
            backend: parking_lot::RwLock::new(None),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// False while stopped or in poll-only mode.
    pub fn events_supported(&self) -> bool {
        self.events_supported.load(Ordering::Acquire)
    }

    /// Backend selected at the last start; `None` while stopped.
    pub fn backend(&self) -> Option<EventBackend> {
        *self.backend.read()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Acquire the watcher and begin forwarding events.
    ///
    /// Fails when already running or when `ctx` is already cancelled. A
    /// missing watcher backend is not a failure; it selects poll-only mode.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(CameraError::Cancelled("event source start".to_string()));
        }
        let mut state = self.state.lock().await;
        if self.started.load(Ordering::Acquire) {
            return Err(CameraError::AlreadyRunning);
        }

        let selected = self
            .config
            .backend
            .unwrap_or_else(backend::detect_event_backend);
        *self.backend.write() = Some(selected);

        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        // TODO: dedicated netlink transport for the udev backend; the
        // directory watcher currently carries both backends.
        match Self::acquire_watcher(&self.config.device_dir, raw_tx) {
            Ok(watcher) => {
                let shutdown = CancellationToken::new();
                let handle = tokio::spawn(event_loop(
                    self.config.device_prefix.clone(),
                    raw_rx,
                    events_tx,
                    shutdown.clone(),
                    self.dropped_events.clone(),
                ));
                state.watcher = Some(watcher);
                state.shutdown = Some(shutdown);
                state.loop_handle = Some(handle);
                self.events_supported.store(true, Ordering::Release);
                info!(
                    dir = %self.config.device_dir.display(),
                    prefix = %self.config.device_prefix,
                    backend = %selected,
                    "device event source started"
                );
            }
            Err(err) => {
                warn!(
                    dir = %self.config.device_dir.display(),
                    backend = %selected,
                    error = %err,
                    "device watcher unavailable, running in poll-only mode"
                );
                state.idle_tx = Some(events_tx);
                self.events_supported.store(false, Ordering::Release);
            }
        }

        state.events_rx = Some(events_rx);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Take the receive side of the events channel. Single consumer; later
    /// calls return `None` until the source is restarted.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<DeviceEvent>> {
        self.state.lock().await.events_rx.take()
    }

    /// Stop the forwarding loop and release the watcher. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(shutdown) = state.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(handle) = state.loop_handle.take()
            && let Err(err) = handle.await
        {
            // The watcher below is still released even if the loop blew up.
            warn!(error = %err, "device event loop terminated abnormally");
        }
        state.watcher = None;
        state.idle_tx = None;
        state.events_rx = None;
        *self.backend.write() = None;
        self.events_supported.store(false, Ordering::Release);
        info!("device event source closed");
    }

    fn acquire_watcher(
        dir: &Path,
        raw_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(err) => warn!(error = %err, "device watcher error"),
            }
        })
        .map_err(|err| CameraError::ResourceUnavailable(format!("device watcher: {err}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                CameraError::ResourceUnavailable(format!("watch {}: {err}", dir.display()))
            })?;
        Ok(watcher)
    }
}

async fn event_loop(
    prefix: String,
    mut raw_rx: mpsc::UnboundedReceiver<Event>,
    events_tx: mpsc::Sender<DeviceEvent>,
    shutdown: CancellationToken,
    dropped: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = raw_rx.recv() => match received {
                Some(event) => forward_event(&prefix, &events_tx, &dropped, event),
                None => break,
            },
        }
    }
    // The sender drops here: the producer owns the close of the channel.
    debug!("device event loop exited");
}

/// Map one raw notification onto the events channel, applying the prefix
/// filter. On overflow the newest event is dropped and counted.
fn forward_event(
    prefix: &str,
    events_tx: &mpsc::Sender<DeviceEvent>,
    dropped: &AtomicU64,
    event: Event,
) {
    let Some(kind) = map_event_kind(&event.kind) else {
        return;
    };
    for path in &event.paths {
        if !matches_prefix(path, prefix) {
            continue;
        }
        let device_event = DeviceEvent::new(kind, &path.to_string_lossy());
        match events_tx.try_send(device_event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    device_path = %rejected.device_path,
                    total_dropped = total,
                    "event buffer full, dropping newest event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

fn map_event_kind(kind: &EventKind) -> Option<DeviceEventKind> {
    match kind {
        EventKind::Create(_) => Some(DeviceEventKind::Add),
        EventKind::Remove(_) => Some(DeviceEventKind::Remove),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            Some(DeviceEventKind::Change)
        }
        _ => None,
    }
}

fn matches_prefix(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(prefix))
}
