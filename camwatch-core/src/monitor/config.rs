//! Monitor configuration snapshot and hot-reload diffing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

/// Listener invoked with every accepted configuration snapshot.
pub type ConfigListener = Arc<dyn Fn(&MonitorConfig) + Send + Sync>;

/// The slice of a configuration manager the monitor needs: somewhere to
/// register its hot-reload listener. The monitor registers on start.
pub trait ConfigWatch: Send + Sync {
    fn register(&self, listener: ConfigListener);
}

pub const DEFAULT_MIN_POLL_INTERVAL_SECONDS: f64 = 0.05;
pub const DEFAULT_MAX_POLL_INTERVAL_SECONDS: f64 = 5.0;

/// Tunable parameters of the hybrid monitor. Replaced wholesale on hot
/// reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Local device numbers considered for discovery (`/dev/video<N>`).
    pub device_range: Vec<u32>,
    pub poll_interval_seconds: f64,
    /// Lower bound for the adaptive poll interval.
    pub min_poll_interval_seconds: f64,
    /// Upper bound for the adaptive poll interval.
    pub max_poll_interval_seconds: f64,
    /// Budget for collecting one full detection cycle across all sources.
    pub detection_timeout_seconds: f64,
    pub enable_capability_detection: bool,
    pub capability_timeout_seconds: f64,
    pub capability_retry_interval_seconds: f64,
    pub capability_max_retries: u32,
    pub device_dir: PathBuf,
    pub device_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_range: vec![0, 1, 2, 3],
            poll_interval_seconds: 0.1,
            min_poll_interval_seconds: DEFAULT_MIN_POLL_INTERVAL_SECONDS,
            max_poll_interval_seconds: DEFAULT_MAX_POLL_INTERVAL_SECONDS,
            detection_timeout_seconds: 2.0,
            enable_capability_detection: true,
            capability_timeout_seconds: 5.0,
            capability_retry_interval_seconds: 1.0,
            capability_max_retries: 3,
            device_dir: PathBuf::from("/dev"),
            device_prefix: "video".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds.max(0.0))
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.detection_timeout_seconds.max(0.0))
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.capability_timeout_seconds.max(0.0))
    }

    pub fn capability_retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.capability_retry_interval_seconds.max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("min_poll_interval_seconds", self.min_poll_interval_seconds),
            ("max_poll_interval_seconds", self.max_poll_interval_seconds),
            ("detection_timeout_seconds", self.detection_timeout_seconds),
            ("capability_timeout_seconds", self.capability_timeout_seconds),
            (
                "capability_retry_interval_seconds",
                self.capability_retry_interval_seconds,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CameraError::InvalidInput(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.min_poll_interval_seconds > self.max_poll_interval_seconds {
            return Err(CameraError::InvalidInput(format!(
                "min_poll_interval_seconds {} exceeds max_poll_interval_seconds {}",
                self.min_poll_interval_seconds, self.max_poll_interval_seconds
            )));
        }
        if self.device_prefix.is_empty() {
            return Err(CameraError::InvalidInput(
                "device_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Field-level difference between two snapshots, for reload logging.
pub fn diff_config(old: &MonitorConfig, new: &MonitorConfig) -> Vec<String> {
    let mut changes = Vec::new();
    if old.device_range != new.device_range {
        changes.push(format!(
            "device_range: {:?} -> {:?}",
            old.device_range, new.device_range
        ));
    }
    for (name, old_value, new_value) in [
        (
            "poll_interval_seconds",
            old.poll_interval_seconds,
            new.poll_interval_seconds,
        ),
        (
            "min_poll_interval_seconds",
            old.min_poll_interval_seconds,
            new.min_poll_interval_seconds,
        ),
        (
            "max_poll_interval_seconds",
            old.max_poll_interval_seconds,
            new.max_poll_interval_seconds,
        ),
        (
            "detection_timeout_seconds",
            old.detection_timeout_seconds,
            new.detection_timeout_seconds,
        ),
        (
            "capability_timeout_seconds",
            old.capability_timeout_seconds,
            new.capability_timeout_seconds,
        ),
        (
            "capability_retry_interval_seconds",
            old.capability_retry_interval_seconds,
            new.capability_retry_interval_seconds,
        ),
    ] {
        if old_value != new_value {
            changes.push(format!("{name}: {old_value} -> {new_value}"));
        }
    }
    if old.enable_capability_detection != new.enable_capability_detection {
        changes.push(format!(
            "enable_capability_detection: {} -> {}",
            old.enable_capability_detection, new.enable_capability_detection
        ));
    }
    if old.capability_max_retries != new.capability_max_retries {
        changes.push(format!(
            "capability_max_retries: {} -> {}",
            old.capability_max_retries, new.capability_max_retries
        ));
    }
    if old.device_dir != new.device_dir {
        changes.push(format!(
            "device_dir: {} -> {}",
            old.device_dir.display(),
            new.device_dir.display()
        ));
    }
    if old.device_prefix != new.device_prefix {
        changes.push(format!(
            "device_prefix: {} -> {}",
            old.device_prefix, new.device_prefix
        ));
    }
    changes
}
