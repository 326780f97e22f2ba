//! The hybrid monitor: adaptive polling fused with the device event stream.
//!
//! One loop task owns the known-devices table. Periodic reconciliation
//! cycles and device events are serialized through it, so there is exactly
//! one writer at any instant. Probing fans out through the bounded worker
//! pool; results are collected under the detection deadline and diffed
//! against the table.

pub mod checker;
pub mod config;
pub mod constructors;

pub use checker::{DeviceChecker, RealDeviceChecker};
pub use config::{ConfigListener, ConfigWatch, MonitorConfig, diff_config};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CapabilityCache;
use crate::error::{CameraError, Result};
use crate::events::{DeviceEventSourceConfig, SourceFactory};
use crate::fanout::{EventFanout, EventNotifier, LifecycleCallback, LifecycleEventHandler};
use crate::pool::{WorkerPool, WorkerPoolConfig};
use crate::probe::{CommandExecutor, DeviceProbe, V4l2CtlExecutor};
use crate::types::{
    CameraSource, DeviceEvent, DeviceEventKind, DeviceRecord, DeviceStatus, LifecycleEvent,
    LifecycleEventKind, MonitorStats, SourceKind,
};

/// Compute the next adaptive poll interval in seconds.
///
/// Failures shorten the interval to probe more aggressively; a healthy
/// cycle stretches it by 10%, bounded to `[min, max]`.
pub fn next_poll_interval(current: f64, failures: u32, min: f64, max: f64) -> f64 {
    if failures > 0 {
        let factor = (1.0 - 0.1 * f64::from(failures)).max(0.5);
        (current * factor).max(min)
    } else {
        (current * 1.1).min(max)
    }
}

#[derive(Debug, Default)]
struct MonitorCounters {
    polling_cycles: AtomicU64,
    state_changes: AtomicU64,
    probe_attempts: AtomicU64,
    probe_successes: AtomicU64,
    probe_timeouts: AtomicU64,
    probe_parse_errors: AtomicU64,
    events_processed: AtomicU64,
    events_filtered: AtomicU64,
    events_skipped: AtomicU64,
}

#[derive(Default)]
struct LifecycleState {
    shutdown: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
    source_acquired: bool,
}

struct MonitorInner {
    config: parking_lot::RwLock<MonitorConfig>,
    sources: parking_lot::RwLock<Vec<CameraSource>>,
    devices: RwLock<HashMap<String, DeviceRecord>>,
    pool: WorkerPool,
    cache: CapabilityCache,
    checker: Arc<dyn DeviceChecker>,
    executor: Arc<dyn CommandExecutor>,
    fanout: EventFanout,
    notifier: parking_lot::RwLock<Option<Arc<dyn EventNotifier>>>,
    config_watch: parking_lot::RwLock<Option<Arc<dyn ConfigWatch>>>,
    config_registered: AtomicBool,
    counters: MonitorCounters,
    poll_interval_ms: AtomicU64,
    running: AtomicBool,
    ready: AtomicBool,
    lifecycle: Mutex<LifecycleState>,
}

/// Owns discovery, the known-devices table, and lifecycle event emission.
#[derive(Clone)]
pub struct HybridMonitor {
    inner: Arc<MonitorInner>,
}

impl fmt::Debug for HybridMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridMonitor")
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .field("ready", &self.inner.ready.load(Ordering::Relaxed))
            .finish()
    }
}

impl HybridMonitor {
    /// Monitor over the real filesystem and the `v4l2-ctl` utility.
    pub fn new(config: MonitorConfig, sources: Vec<CameraSource>) -> Result<Self> {
        Self::with_collaborators(
            config,
            sources,
            Arc::new(RealDeviceChecker),
            Arc::new(V4l2CtlExecutor::default()),
            WorkerPoolConfig::default(),
        )
    }

    /// Monitor with injected collaborators, used by tests and embedders.
    pub fn with_collaborators(
        config: MonitorConfig,
        sources: Vec<CameraSource>,
        checker: Arc<dyn DeviceChecker>,
        executor: Arc<dyn CommandExecutor>,
        pool_config: WorkerPoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        let poll_interval_ms = duration_to_ms(config.poll_interval());
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config: parking_lot::RwLock::new(config),
                sources: parking_lot::RwLock::new(sources),
                devices: RwLock::new(HashMap::new()),
                pool: WorkerPool::new(pool_config),
                cache: CapabilityCache::new(),
                checker,
                executor,
                fanout: EventFanout::new(),
                notifier: parking_lot::RwLock::new(None),
                config_watch: parking_lot::RwLock::new(None),
                config_registered: AtomicBool::new(false),
                counters: MonitorCounters::default(),
                poll_interval_ms: AtomicU64::new(poll_interval_ms),
                running: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                lifecycle: Mutex::new(LifecycleState::default()),
            }),
        })
    }

    /// Launch the monitoring loop. Fails when already running.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(CameraError::Cancelled("monitor start".to_string()));
        }
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.running.load(Ordering::Acquire) {
            return Err(CameraError::AlreadyRunning);
        }

        self.inner.pool.start()?;

        // Hot reload: the listener outlives registrations, so one per
        // monitor is enough even across restarts.
        let watch = self.inner.config_watch.read().clone();
        if let Some(watch) = watch
            && !self.inner.config_registered.swap(true, Ordering::AcqRel)
        {
            watch.register(self.config_listener());
        }

        let (device_dir, device_prefix, poll_interval) = {
            let config = self.inner.config.read();
            (
                config.device_dir.clone(),
                config.device_prefix.clone(),
                config.poll_interval(),
            )
        };

        let source = SourceFactory::acquire_with_config(DeviceEventSourceConfig {
            device_dir,
            device_prefix,
            ..DeviceEventSourceConfig::default()
        });
        lifecycle.source_acquired = true;
        match source.start(ctx).await {
            // Another holder already started the shared source.
            Ok(()) | Err(CameraError::AlreadyRunning) => {}
            Err(err) => {
                warn!(error = %err, "device event source failed to start, polling only");
            }
        }
        let events_rx = source.take_events().await;

        self.inner
            .poll_interval_ms
            .store(duration_to_ms(poll_interval), Ordering::Relaxed);
        self.inner.ready.store(false, Ordering::Release);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.inner.clone(),
            shutdown.clone(),
            events_rx,
        ));
        lifecycle.shutdown = Some(shutdown);
        lifecycle.loop_handle = Some(handle);
        self.inner.running.store(true, Ordering::Release);
        info!(
            events_supported = source.events_supported(),
            backend = ?source.backend(),
            "camera monitor started"
        );
        Ok(())
    }

    /// Stop the loop, drain handlers, stop the pool, and release the event
    /// source. Idempotent; sub-component errors collapse into one return.
    pub async fn stop(&self, ctx: &CancellationToken) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            // Still release a source acquired by a start that failed midway.
            if lifecycle.source_acquired {
                lifecycle.source_acquired = false;
                let _ = SourceFactory::release().await;
            }
            return Ok(());
        }

        if let Some(shutdown) = lifecycle.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(mut handle) = lifecycle.loop_handle.take() {
            tokio::select! {
                joined = &mut handle => {
                    if let Err(err) = joined {
                        warn!(error = %err, "monitor loop terminated abnormally");
                    }
                }
                _ = ctx.cancelled() => {
                    warn!("monitor stop deadline expired, aborting loop");
                    handle.abort();
                }
            }
        }

        // Handler registrations drop before the pool so task closures that
        // reference monitor state are gone by the time the pool is released.
        self.inner.fanout.shutdown().await;

        let mut result = Ok(());
        if let Err(err) = self.inner.pool.stop(ctx).await {
            warn!(error = %err, "worker pool stop failed");
            result = Err(err);
        }
        if lifecycle.source_acquired {
            lifecycle.source_acquired = false;
            if let Err(err) = SourceFactory::release().await
                && result.is_ok()
            {
                result = Err(err);
            }
        }

        self.inner.devices.write().await.clear();
        self.inner.ready.store(false, Ordering::Release);
        info!("camera monitor stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// True once the first reconciliation cycle has completed, found
    /// devices or not.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub async fn connected_cameras(&self) -> Vec<DeviceRecord> {
        self.inner
            .devices
            .read()
            .await
            .values()
            .filter(|record| record.status == DeviceStatus::Connected)
            .cloned()
            .collect()
    }

    pub async fn device(&self, path: &str) -> Option<DeviceRecord> {
        self.inner.devices.read().await.get(path).cloned()
    }

    pub async fn monitor_stats(&self) -> MonitorStats {
        let counters = &self.inner.counters;
        MonitorStats {
            running: self.inner.running.load(Ordering::Acquire),
            ready: self.inner.ready.load(Ordering::Acquire),
            active_tasks: self.inner.pool.stats().active,
            polling_cycles: counters.polling_cycles.load(Ordering::Relaxed),
            state_changes: counters.state_changes.load(Ordering::Relaxed),
            probe_attempts: counters.probe_attempts.load(Ordering::Relaxed),
            probe_successes: counters.probe_successes.load(Ordering::Relaxed),
            probe_timeouts: counters.probe_timeouts.load(Ordering::Relaxed),
            probe_parse_errors: counters.probe_parse_errors.load(Ordering::Relaxed),
            poll_interval: Duration::from_millis(
                self.inner.poll_interval_ms.load(Ordering::Relaxed),
            ),
            known_devices: self.inner.devices.read().await.len(),
            events_processed: counters.events_processed.load(Ordering::Relaxed),
            events_filtered: counters.events_filtered.load(Ordering::Relaxed),
            events_skipped: counters.events_skipped.load(Ordering::Relaxed),
        }
    }

    pub async fn add_event_handler(&self, handler: Arc<dyn LifecycleEventHandler>) {
        self.inner.fanout.add_handler(handler).await;
    }

    pub async fn add_event_callback(&self, callback: LifecycleCallback) {
        self.inner.fanout.add_callback(callback).await;
    }

    pub fn set_event_notifier(&self, notifier: Arc<dyn EventNotifier>) {
        *self.inner.notifier.write() = Some(notifier);
    }

    /// Hand the monitor its configuration manager. `start` registers the
    /// hot-reload listener with it, so attach before starting.
    pub fn set_config_watch(&self, watch: Arc<dyn ConfigWatch>) {
        *self.inner.config_watch.write() = Some(watch);
    }

    /// Add or replace a configured source by id.
    pub fn add_source(&self, source: CameraSource) {
        let mut sources = self.inner.sources.write();
        if let Some(existing) = sources.iter_mut().find(|s| s.id == source.id) {
            *existing = source;
        } else {
            sources.push(source);
        }
    }

    pub fn remove_source(&self, id: &str) {
        self.inner.sources.write().retain(|s| s.id != id);
    }

    pub fn sources(&self) -> Vec<CameraSource> {
        self.inner.sources.read().clone()
    }

    pub fn config(&self) -> MonitorConfig {
        self.inner.config.read().clone()
    }

    /// Apply a hot-reloaded configuration snapshot. Safe to call at any
    /// time; invalid snapshots are logged and dropped.
    pub fn apply_config(&self, new: &MonitorConfig) {
        self.inner.apply_config(new);
    }

    /// Callback suitable for registration with a configuration manager.
    /// Holds only a weak reference, so it never keeps a stopped monitor
    /// alive.
    pub fn config_listener(&self) -> ConfigListener {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |config: &MonitorConfig| {
            if let Some(inner) = inner.upgrade() {
                inner.apply_config(config);
            }
        })
    }

    /// Pick a pixel format for `codec` from the device's supported list.
    ///
    /// Unknown devices are an error; a device with no matching format gets
    /// the documented fallback token.
    pub async fn select_optimal_pixel_format(&self, path: &str, codec: &str) -> Result<String> {
        let devices = self.inner.devices.read().await;
        let device = devices
            .get(path)
            .ok_or_else(|| CameraError::InvalidInput(format!("unknown device: {path}")))?;

        let preferences: &[&str] = match codec.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "h265" | "hevc" => &["H264", "MJPG", "YUYV"],
            "mjpeg" | "mjpg" => &["MJPG", "YUYV"],
            "yuyv" | "rawvideo" | "raw" => &["YUYV"],
            _ => &["YUYV", "MJPG"],
        };
        for preference in preferences {
            if device
                .formats
                .iter()
                .any(|format| format.pixel_format.eq_ignore_ascii_case(preference))
            {
                return Ok((*preference).to_string());
            }
        }
        Ok(constructors::FALLBACK_PIXEL_FORMAT.to_string())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

async fn recv_event(rx: &mut Option<mpsc::Receiver<DeviceEvent>>) -> Option<DeviceEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_loop(
    inner: Arc<MonitorInner>,
    shutdown: CancellationToken,
    mut events_rx: Option<mpsc::Receiver<DeviceEvent>>,
) {
    debug!("monitor loop started");
    loop {
        let interval = Duration::from_millis(inner.poll_interval_ms.load(Ordering::Relaxed).max(1));
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                inner.run_cycle(&shutdown).await;
                inner.ready.store(true, Ordering::Release);
            }
            event = recv_event(&mut events_rx) => match event {
                Some(event) => inner.handle_device_event(&shutdown, event).await,
                None => {
                    debug!("device event stream ended, continuing with polling only");
                    events_rx = None;
                }
            }
        }
    }
    debug!("monitor loop exited");
}

impl MonitorInner {
    fn config_snapshot(&self) -> MonitorConfig {
        self.config.read().clone()
    }

    fn apply_config(&self, new: &MonitorConfig) {
        if let Err(err) = new.validate() {
            warn!(error = %err, "rejecting configuration update");
            return;
        }
        let poll_changed;
        {
            let mut config = self.config.write();
            let changes = diff_config(&config, new);
            if changes.is_empty() {
                debug!("configuration reload produced no changes");
                return;
            }
            poll_changed =
                config.poll_interval_seconds != new.poll_interval_seconds;
            info!(changes = ?changes, "configuration updated");
            *config = new.clone();
        }
        if poll_changed || !self.running.load(Ordering::Acquire) {
            self.poll_interval_ms
                .store(duration_to_ms(new.poll_interval()), Ordering::Relaxed);
        }
    }

    /// Enabled explicit sources plus local devices derived from the
    /// configured device range.
    fn effective_sources(&self) -> Vec<CameraSource> {
        let config = self.config.read();
        let mut sources: Vec<CameraSource> = self
            .sources
            .read()
            .iter()
            .filter(|source| source.enabled)
            .cloned()
            .collect();
        for number in &config.device_range {
            let path = local_device_path(&config.device_dir, &config.device_prefix, *number);
            if sources.iter().any(|source| source.source == path) {
                continue;
            }
            let mut source =
                CameraSource::local(&format!("{}{}", config.device_prefix, number), &path);
            source.description = format!("Video Device {number}");
            sources.push(source);
        }
        sources
    }

    async fn run_cycle(self: &Arc<Self>, shutdown: &CancellationToken) {
        self.counters.polling_cycles.fetch_add(1, Ordering::Relaxed);
        let sources = self.effective_sources();
        let detection_timeout = self.config_snapshot().detection_timeout();

        let (tx, mut rx) = mpsc::channel::<Result<Option<DeviceRecord>>>(sources.len().max(1));
        let mut submitted = 0usize;
        let mut failures = 0u32;

        for source in sources {
            let inner = self.clone();
            let tx = tx.clone();
            let submit = self
                .pool
                .submit(shutdown, move |token| async move {
                    let record = inner.build_record(&token, &source).await;
                    let _ = tx.send(record).await;
                })
                .await;
            match submit {
                Ok(()) => submitted += 1,
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, "failed to submit probe task");
                }
            }
        }
        drop(tx);

        let mut current = HashMap::new();
        let deadline = tokio::time::Instant::now() + detection_timeout;
        for _ in 0..submitted {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(Ok(Some(record)))) => {
                    current.insert(record.path.clone(), record);
                }
                Ok(Some(Ok(None))) => {} // source absent, not a failure
                Ok(Some(Err(err))) => {
                    failures += 1;
                    warn!(error = %err, "source probe failed");
                }
                Ok(None) => break,
                Err(_) => {
                    failures += 1;
                    warn!("detection cycle deadline expired collecting probe results");
                    break;
                }
            }
        }

        self.reconcile(current).await;
        self.adjust_polling_interval(failures);
    }

    async fn build_record(
        self: &Arc<Self>,
        token: &CancellationToken,
        source: &CameraSource,
    ) -> Result<Option<DeviceRecord>> {
        match source.kind {
            SourceKind::LocalVideoDevice => self.build_local_record(token, source).await,
            SourceKind::Rtsp | SourceKind::Http | SourceKind::MulticastNetwork => {
                Ok(Some(constructors::network_record(source)))
            }
            SourceKind::File => Ok(Some(constructors::file_record(
                source,
                self.checker.exists(&source.source),
            ))),
            SourceKind::Generic => Ok(Some(constructors::generic_record(source))),
        }
    }

    async fn build_local_record(
        self: &Arc<Self>,
        token: &CancellationToken,
        source: &CameraSource,
    ) -> Result<Option<DeviceRecord>> {
        let path = source.source.as_str();
        if !self.checker.exists(path) {
            return Ok(None);
        }
        let config = self.config_snapshot();
        if !config.enable_capability_detection {
            return Ok(Some(constructors::local_record(source, None, None)));
        }
        if let Some(report) = self.cache.get(path) {
            return Ok(Some(constructors::local_record(source, Some(report), None)));
        }

        self.counters.probe_attempts.fetch_add(1, Ordering::Relaxed);
        let probe = DeviceProbe::new(self.executor.clone(), config.capability_timeout());
        match probe
            .probe_with_retry(
                token,
                path,
                config.capability_max_retries,
                config.capability_retry_interval(),
            )
            .await
        {
            Ok(report) => {
                self.counters
                    .probe_successes
                    .fetch_add(1, Ordering::Relaxed);
                self.cache.insert(path, report.clone());
                Ok(Some(constructors::local_record(source, Some(report), None)))
            }
            Err(err) => {
                match &err {
                    CameraError::TimedOut(_) => {
                        self.counters.probe_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    CameraError::Parse(_) => {
                        self.counters
                            .probe_parse_errors
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                warn!(device = path, error = %err, "capability probe failed");
                Ok(Some(constructors::local_record(
                    source,
                    None,
                    Some(err.to_string()),
                )))
            }
        }
    }

    /// Diff `current` against the known-devices table and emit lifecycle
    /// events. Devices flipped to disconnected are kept for one cycle so
    /// the event goes out, then dropped.
    async fn reconcile(&self, current: HashMap<String, DeviceRecord>) {
        let mut emitted = Vec::new();
        {
            let mut devices = self.devices.write().await;

            let expired: Vec<String> = devices
                .iter()
                .filter(|(path, record)| {
                    record.status == DeviceStatus::Disconnected && !current.contains_key(*path)
                })
                .map(|(path, _)| path.clone())
                .collect();
            for path in expired {
                devices.remove(&path);
                self.cache.invalidate(&path);
                debug!(device = %path, "dropped disconnected device");
            }

            let current_paths: HashSet<String> = current.keys().cloned().collect();

            for (path, record) in current {
                match devices.get_mut(&path) {
                    Some(existing) => {
                        existing.last_seen = record.last_seen;
                        if existing.status != record.status {
                            if record.status == DeviceStatus::Error {
                                self.cache.invalidate(&path);
                            }
                            let reconnected = existing.status == DeviceStatus::Disconnected
                                && record.status == DeviceStatus::Connected;
                            existing.status = record.status;
                            existing.last_error = record.last_error;
                            existing.capabilities = record.capabilities;
                            existing.formats = record.formats;
                            self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                            let kind = if reconnected {
                                LifecycleEventKind::Connected
                            } else {
                                LifecycleEventKind::StatusChanged
                            };
                            emitted.push(LifecycleEvent::new(kind, existing.clone()));
                        }
                    }
                    None => {
                        devices.insert(path.clone(), record.clone());
                        self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                        emitted.push(LifecycleEvent::new(LifecycleEventKind::Connected, record));
                    }
                }
            }

            for record in devices.values_mut() {
                if !current_paths.contains(&record.path)
                    && record.status != DeviceStatus::Disconnected
                {
                    record.status = DeviceStatus::Disconnected;
                    self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                    emitted.push(LifecycleEvent::new(
                        LifecycleEventKind::Disconnected,
                        record.clone(),
                    ));
                }
            }
        }

        for event in emitted {
            self.emit(event).await;
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        debug!(kind = %event.kind, device = %event.device_path, "lifecycle event");
        self.fanout.publish(&event).await;
        let notifier = self.notifier.read().clone();
        if let Some(notifier) = notifier {
            notifier.notify(&event);
        }
    }

    fn adjust_polling_interval(&self, failures: u32) {
        let (min, max) = {
            let config = self.config.read();
            (
                config.min_poll_interval_seconds,
                config.max_poll_interval_seconds,
            )
        };
        let current = self.poll_interval_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        let next = next_poll_interval(current, failures, min, max);
        self.poll_interval_ms
            .store((next * 1000.0).round() as u64, Ordering::Relaxed);
        if failures > 0 {
            debug!(
                failures,
                next_interval_secs = next,
                "shortening poll interval after failures"
            );
        }
    }

    fn event_is_relevant(&self, config: &MonitorConfig, path: &str) -> bool {
        if self
            .sources
            .read()
            .iter()
            .any(|source| source.enabled && source.source == path)
        {
            return true;
        }
        match constructors::parse_device_number(path) {
            Some(number) => config.device_range.contains(&number),
            None => false,
        }
    }

    fn source_for_path(&self, path: &str) -> CameraSource {
        if let Some(source) = self
            .sources
            .read()
            .iter()
            .find(|source| source.enabled && source.source == path)
        {
            return source.clone();
        }
        let id = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path)
            .to_string();
        CameraSource::local(&id, path)
    }

    async fn handle_device_event(self: &Arc<Self>, token: &CancellationToken, event: DeviceEvent) {
        let config = self.config_snapshot();
        if !self.event_is_relevant(&config, &event.device_path) {
            self.counters.events_filtered.fetch_add(1, Ordering::Relaxed);
            debug!(device = %event.device_path, "ignoring event outside configured sources");
            return;
        }
        self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
        debug!(kind = ?event.kind, device = %event.device_path, "handling device event");
        match event.kind {
            DeviceEventKind::Add => self.handle_device_added(token, &event.device_path).await,
            DeviceEventKind::Remove => self.handle_device_removed(&event.device_path).await,
            DeviceEventKind::Change => self.handle_device_changed(token, &event.device_path).await,
        }
    }

    async fn handle_device_added(self: &Arc<Self>, token: &CancellationToken, path: &str) {
        let source = self.source_for_path(path);
        match self.build_record(token, &source).await {
            Ok(Some(record)) => {
                if let Some(event) = self.upsert_record(record).await {
                    self.emit(event).await;
                }
            }
            Ok(None) => {
                self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(device = path, "add event for absent device");
            }
            Err(err) => {
                self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
                warn!(device = path, error = %err, "targeted probe failed");
            }
        }
    }

    async fn handle_device_removed(&self, path: &str) {
        let event = {
            let mut devices = self.devices.write().await;
            match devices.get_mut(path) {
                Some(existing) if existing.status != DeviceStatus::Disconnected => {
                    existing.status = DeviceStatus::Disconnected;
                    self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                    Some(LifecycleEvent::new(
                        LifecycleEventKind::Disconnected,
                        existing.clone(),
                    ))
                }
                _ => {
                    self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        };
        self.cache.invalidate(path);
        if let Some(event) = event {
            self.emit(event).await;
        }
    }

    async fn handle_device_changed(self: &Arc<Self>, token: &CancellationToken, path: &str) {
        if !self.devices.read().await.contains_key(path) {
            self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(device = path, "change event for unknown device");
            return;
        }
        // Re-probe from scratch; the memoized report is stale by definition.
        self.cache.invalidate(path);
        let source = self.source_for_path(path);
        match self.build_record(token, &source).await {
            Ok(Some(record)) => {
                if let Some(event) = self.upsert_record(record).await {
                    self.emit(event).await;
                }
            }
            Ok(None) => self.handle_device_removed(path).await,
            Err(err) => {
                self.counters.events_skipped.fetch_add(1, Ordering::Relaxed);
                warn!(device = path, error = %err, "re-probe failed");
            }
        }
    }

    /// Insert or update a record, preserving the identity fields of an
    /// existing entry. Returns the lifecycle event to emit, if any.
    async fn upsert_record(&self, record: DeviceRecord) -> Option<LifecycleEvent> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&record.path) {
            Some(existing) => {
                let name = existing.name.clone();
                let device_number = existing.device_number;
                let previous = existing.status;
                *existing = record;
                existing.name = name;
                existing.device_number = device_number;
                if previous == existing.status {
                    return None;
                }
                if existing.status == DeviceStatus::Error {
                    self.cache.invalidate(&existing.path);
                }
                self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                let kind = if previous == DeviceStatus::Disconnected
                    && existing.status == DeviceStatus::Connected
                {
                    LifecycleEventKind::Connected
                } else {
                    LifecycleEventKind::StatusChanged
                };
                Some(LifecycleEvent::new(kind, existing.clone()))
            }
            None => {
                devices.insert(record.path.clone(), record.clone());
                self.counters.state_changes.fetch_add(1, Ordering::Relaxed);
                Some(LifecycleEvent::new(LifecycleEventKind::Connected, record))
            }
        }
    }
}

fn local_device_path(dir: &Path, prefix: &str, number: u32) -> String {
    dir.join(format!("{prefix}{number}"))
        .to_string_lossy()
        .into_owned()
}
