//! Shared device, source, and event records.
//!
//! Everything here is plain data: records are cloned out of the monitor's
//! tables so consumers always hold a stable snapshot, and the serde shapes
//! match what the RPC layer puts on the wire.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status of a camera device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Error,
    Probing,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Connected => write!(f, "connected"),
            DeviceStatus::Disconnected => write!(f, "disconnected"),
            DeviceStatus::Error => write!(f, "error"),
            DeviceStatus::Probing => write!(f, "probing"),
        }
    }
}

/// Driver-level capability report for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub driver_name: String,
    pub card_name: String,
    pub bus_info: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub device_caps: Vec<String>,
}

/// One supported pixel format at one frame size.
///
/// A width and height of 0 mean the format was reported but size enumeration
/// failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub frame_rates: Vec<String>,
}

impl DeviceFormat {
    pub fn new(pixel_format: &str, width: u32, height: u32, frame_rates: &[&str]) -> Self {
        Self {
            pixel_format: pixel_format.to_string(),
            width,
            height,
            frame_rates: frame_rates.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Identity and live status of a single camera device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_number: Option<u32>,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub capabilities: Capabilities,
    pub formats: Vec<DeviceFormat>,
}

/// Kind of source a camera can be probed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LocalVideoDevice,
    Rtsp,
    Http,
    MulticastNetwork,
    File,
    Generic,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::LocalVideoDevice => write!(f, "local_video_device"),
            SourceKind::Rtsp => write!(f, "rtsp"),
            SourceKind::Http => write!(f, "http"),
            SourceKind::MulticastNetwork => write!(f, "multicast_network"),
            SourceKind::File => write!(f, "file"),
            SourceKind::Generic => write!(f, "generic"),
        }
    }
}

/// A configured thing to probe: a local capture device, a network camera, or
/// a media file standing in for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSource {
    pub kind: SourceKind,
    pub id: String,
    /// Native address of the source: a device path for local devices, a URI
    /// for network cameras, a filesystem path for files.
    pub source: String,
    pub enabled: bool,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
}

impl CameraSource {
    pub fn local(id: &str, path: &str) -> Self {
        Self {
            kind: SourceKind::LocalVideoDevice,
            id: id.to_string(),
            source: path.to_string(),
            enabled: true,
            options: HashMap::new(),
            description: String::new(),
        }
    }

    pub fn network(kind: SourceKind, id: &str, uri: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            source: uri.to_string(),
            enabled: true,
            options: HashMap::new(),
            description: String::new(),
        }
    }
}

/// Raw device notification as observed by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEventKind {
    Add,
    Remove,
    Change,
}

/// A device arrival, departure, or attribute change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(rename = "type")]
    pub kind: DeviceEventKind,
    pub device_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(kind: DeviceEventKind, device_path: &str) -> Self {
        Self {
            kind,
            device_path: device_path.to_string(),
            vendor: None,
            product: None,
            serial: None,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle transition of a monitored device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Connected,
    Disconnected,
    StatusChanged,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEventKind::Connected => write!(f, "connected"),
            LifecycleEventKind::Disconnected => write!(f, "disconnected"),
            LifecycleEventKind::StatusChanged => write!(f, "status_changed"),
        }
    }
}

/// Event delivered to handlers and downstream notifiers.
///
/// `device` is a snapshot taken at emission time; later mutation of the
/// monitor's table never shows through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: LifecycleEventKind,
    pub device_path: String,
    pub timestamp: DateTime<Utc>,
    pub device: DeviceRecord,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, device: DeviceRecord) -> Self {
        Self {
            kind,
            device_path: device.path.clone(),
            timestamp: Utc::now(),
            device,
        }
    }
}

/// Point-in-time snapshot of the monitor's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStats {
    pub running: bool,
    pub ready: bool,
    pub active_tasks: u64,
    pub polling_cycles: u64,
    pub state_changes: u64,
    pub probe_attempts: u64,
    pub probe_successes: u64,
    pub probe_timeouts: u64,
    pub probe_parse_errors: u64,
    pub poll_interval: Duration,
    pub known_devices: usize,
    pub events_processed: u64,
    pub events_filtered: u64,
    pub events_skipped: u64,
}
