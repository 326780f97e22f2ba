//! Configuration loading and hot-reload distribution for Camwatch.

pub mod manager;
pub mod models;

pub use manager::{ConfigManager, ReloadCallback};
pub use models::{CamwatchConfig, CamwatchConfigSource, PoolSettings};
