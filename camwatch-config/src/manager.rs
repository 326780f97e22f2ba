//! Holds the current configuration and pushes reloads to subscribers.

use std::fmt;
use std::sync::Arc;

use camwatch_core::monitor::{ConfigListener, ConfigWatch};
use camwatch_core::Result;
use parking_lot::RwLock;
use tracing::info;

use crate::models::CamwatchConfig;

/// Callback invoked with every accepted configuration update.
pub type ReloadCallback = Arc<dyn Fn(&CamwatchConfig) + Send + Sync>;

/// Push-reload hub: `apply` validates, stores, and fans the new snapshot to
/// every subscriber. Safe to call at any time.
pub struct ConfigManager {
    current: RwLock<CamwatchConfig>,
    subscribers: RwLock<Vec<ReloadCallback>>,
}

impl fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigManager")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl ConfigManager {
    pub fn new(config: CamwatchConfig) -> Self {
        Self {
            current: RwLock::new(config),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> CamwatchConfig {
        self.current.read().clone()
    }

    pub fn subscribe(&self, callback: ReloadCallback) {
        self.subscribers.write().push(callback);
    }

    /// Validate and adopt `new`, then notify subscribers outside the lock.
    pub fn apply(&self, new: CamwatchConfig) -> Result<()> {
        new.validate()?;
        *self.current.write() = new.clone();
        info!("configuration applied");
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber(&new);
        }
        Ok(())
    }
}

/// Lets a monitor register its hot-reload listener on start; only the
/// monitor-relevant slice of each accepted snapshot is forwarded.
impl ConfigWatch for ConfigManager {
    fn register(&self, listener: ConfigListener) {
        self.subscribe(Arc::new(move |config: &CamwatchConfig| {
            listener(&config.monitor);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn apply_stores_and_notifies() {
        let manager = ConfigManager::new(CamwatchConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        manager.subscribe(Arc::new(move |config: &CamwatchConfig| {
            seen_in_callback
                .lock()
                .push(config.monitor.poll_interval_seconds);
        }));

        let mut updated = CamwatchConfig::default();
        updated.monitor.poll_interval_seconds = 0.75;
        manager.apply(updated).unwrap();

        assert_eq!(manager.snapshot().monitor.poll_interval_seconds, 0.75);
        assert_eq!(*seen.lock(), vec![0.75]);
    }

    #[test]
    fn invalid_snapshot_is_rejected_and_not_stored() {
        let manager = ConfigManager::new(CamwatchConfig::default());
        let mut bad = CamwatchConfig::default();
        bad.monitor.poll_interval_seconds = -1.0;

        assert!(manager.apply(bad).is_err());
        assert_eq!(
            manager.snapshot().monitor.poll_interval_seconds,
            CamwatchConfig::default().monitor.poll_interval_seconds
        );
    }

    #[tokio::test]
    async fn monitor_start_registers_the_reload_listener() {
        use camwatch_core::{HybridMonitor, MonitorConfig};
        use tokio_util::sync::CancellationToken;

        let dir = tempfile::tempdir().unwrap();
        let monitor_config = MonitorConfig {
            device_range: Vec::new(),
            poll_interval_seconds: 5.0,
            device_dir: dir.path().to_path_buf(),
            ..MonitorConfig::default()
        };
        let monitor = HybridMonitor::new(monitor_config.clone(), Vec::new()).unwrap();
        let manager = Arc::new(ConfigManager::new(CamwatchConfig {
            monitor: monitor_config,
            ..CamwatchConfig::default()
        }));
        monitor.set_config_watch(manager.clone());

        // Nothing is registered until the monitor starts.
        let mut early = manager.snapshot();
        early.monitor.poll_interval_seconds = 3.0;
        manager.apply(early).unwrap();
        assert_eq!(monitor.config().poll_interval_seconds, 5.0);

        let ctx = CancellationToken::new();
        monitor.start(&ctx).await.unwrap();

        let mut updated = manager.snapshot();
        updated.monitor.poll_interval_seconds = 2.0;
        manager.apply(updated).unwrap();
        assert_eq!(monitor.config().poll_interval_seconds, 2.0);

        monitor.stop(&ctx).await.unwrap();
    }
}
