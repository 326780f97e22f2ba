//! Top-level configuration document and its loading rules.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::Context;
use camwatch_core::pool::{DEFAULT_MAX_WORKERS, WorkerPoolConfig};
use camwatch_core::{MonitorConfig, Result};
use serde::{Deserialize, Serialize};

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CamwatchConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Worker pool sizing for capability probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_workers: usize,
    pub task_timeout_seconds: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout_seconds: 5.0,
        }
    }
}

impl PoolSettings {
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_workers: self.max_workers,
            task_timeout: Duration::from_secs_f64(self.task_timeout_seconds.max(0.0)),
        }
    }
}

/// The full Camwatch configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CamwatchConfig {
    pub monitor: MonitorConfig,
    pub pool: PoolSettings,
}

impl CamwatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()
    }

    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$CAMWATCH_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$CAMWATCH_CONFIG_JSON` (inline JSON),
    /// 3) a default file location,
    /// 4) defaults if none are set.
    pub fn load_from_env() -> anyhow::Result<(Self, CamwatchConfigSource)> {
        if let Ok(path_str) = env::var("CAMWATCH_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, CamwatchConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("CAMWATCH_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed: Self = serde_json::from_str(&raw)
                .context("failed to parse CAMWATCH_CONFIG_JSON")?;
            return Ok((parsed, CamwatchConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, CamwatchConfigSource::File(path)));
        }

        Ok((Self::default(), CamwatchConfigSource::Default))
    }

    /// Load a TOML or JSON configuration file, deciding by extension.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON config {}", path.display()))?,
            _ => toml::from_str(&raw)
                .with_context(|| format!("invalid TOML config {}", path.display()))?,
        };
        Ok(config)
    }

    fn find_default_file() -> Option<PathBuf> {
        for candidate in ["camwatch.toml", "/etc/camwatch/camwatch.toml"] {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}
