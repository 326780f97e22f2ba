//! Core library for the Camwatch streaming server.
//!
//! Camwatch keeps a live map of the video-capture devices visible to the
//! host: a hybrid monitor fuses an adaptive polling loop with filesystem
//! device notifications, probes new devices for their capabilities through
//! the v4l2 enumeration utility, and publishes typed lifecycle events to
//! downstream consumers.

pub mod cache;
pub mod error;
pub mod events;
pub mod fanout;
pub mod monitor;
pub mod pool;
pub mod probe;
pub mod types;

pub use cache::{CapabilityCache, ProbeReport};
pub use error::{CameraError, Result};
pub use events::{
    DeviceEventSource, DeviceEventSourceConfig, EventBackend, SourceFactory, detect_event_backend,
    running_in_container,
};
pub use fanout::{EventFanout, EventNotifier, LifecycleCallback, LifecycleEventHandler};
pub use monitor::{
    ConfigListener, ConfigWatch, DeviceChecker, HybridMonitor, MonitorConfig, RealDeviceChecker,
    diff_config,
};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig};
pub use probe::{CommandExecutor, DeviceProbe, V4l2CtlExecutor, default_formats, parser};
pub use types::*;
