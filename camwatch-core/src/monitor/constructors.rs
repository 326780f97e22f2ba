//! Per-source-kind construction of tentative device records.
//!
//! Constructors tolerate degenerate input (empty paths, unicode, unmatched
//! kinds) and carry it verbatim into the record's path and name fields.

use chrono::Utc;

use crate::cache::ProbeReport;
use crate::probe;
use crate::probe::parser::{DEFAULT_CARD_NAME, DEFAULT_DRIVER_NAME};
use crate::types::{
    Capabilities, CameraSource, DeviceFormat, DeviceRecord, DeviceStatus, SourceKind,
};

pub const FALLBACK_PIXEL_FORMAT: &str = "YUYV";

const NETWORK_FRAME_RATES: [&str; 3] = ["30.000", "25.000", "15.000"];

/// Parse the numeric suffix of a local device path (`/dev/video3` -> 3).
pub fn parse_device_number(path: &str) -> Option<u32> {
    let name = std::path::Path::new(path).file_name()?.to_str()?;
    let digits: String = name.chars().skip_while(|c| !c.is_ascii_digit()).collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn record_name(source: &CameraSource) -> String {
    if !source.description.is_empty() {
        source.description.clone()
    } else if !source.id.is_empty() {
        source.id.clone()
    } else {
        source.source.clone()
    }
}

fn base_record(source: &CameraSource, status: DeviceStatus) -> DeviceRecord {
    DeviceRecord {
        path: source.source.clone(),
        name: record_name(source),
        device_number: match source.kind {
            SourceKind::LocalVideoDevice => parse_device_number(&source.source),
            _ => None,
        },
        status,
        last_seen: Utc::now(),
        last_error: None,
        capabilities: Capabilities::default(),
        formats: Vec::new(),
    }
}

fn synthetic_capabilities(kind: SourceKind) -> Capabilities {
    let card_name = match kind {
        SourceKind::Rtsp => "RTSP Network Camera",
        SourceKind::Http => "HTTP Network Camera",
        SourceKind::MulticastNetwork => "Multicast Network Camera",
        SourceKind::File => "File Source",
        SourceKind::Generic => "Generic Camera Source",
        SourceKind::LocalVideoDevice => DEFAULT_CARD_NAME,
    };
    Capabilities {
        driver_name: kind.to_string(),
        card_name: card_name.to_string(),
        ..Capabilities::default()
    }
}

/// RTSP, HTTP, and multicast sources are assumed connected; the core does
/// no live reachability probe.
pub fn network_record(source: &CameraSource) -> DeviceRecord {
    let mut record = base_record(source, DeviceStatus::Connected);
    record.capabilities = synthetic_capabilities(source.kind);
    record.formats = vec![DeviceFormat::new("YUYV", 1920, 1080, &NETWORK_FRAME_RATES)];
    record
}

pub fn file_record(source: &CameraSource, exists: bool) -> DeviceRecord {
    let status = if exists {
        DeviceStatus::Connected
    } else {
        DeviceStatus::Disconnected
    };
    let mut record = base_record(source, status);
    record.capabilities = synthetic_capabilities(SourceKind::File);
    record.formats = vec![DeviceFormat::new("H264", 1920, 1080, &NETWORK_FRAME_RATES)];
    record
}

pub fn generic_record(source: &CameraSource) -> DeviceRecord {
    let mut record = base_record(source, DeviceStatus::Connected);
    record.capabilities = synthetic_capabilities(SourceKind::Generic);
    record.formats = vec![DeviceFormat::new("YUYV", 1920, 1080, &NETWORK_FRAME_RATES)];
    record
}

/// Build a local device record from a probe outcome.
///
/// `report` present means a successful (or cached) probe. A `probe_error`
/// marks the device as errored but still visible; neither present means
/// capability detection is disabled.
pub fn local_record(
    source: &CameraSource,
    report: Option<ProbeReport>,
    probe_error: Option<String>,
) -> DeviceRecord {
    match (report, probe_error) {
        (Some(report), _) => {
            let mut record = base_record(source, DeviceStatus::Connected);
            record.capabilities = report.capabilities;
            record.formats = report.formats;
            record
        }
        (None, Some(error)) => {
            let mut record = base_record(source, DeviceStatus::Error);
            record.last_error = Some(error);
            record.capabilities = placeholder_local_capabilities();
            record.formats = probe::default_formats();
            record
        }
        (None, None) => {
            let mut record = base_record(source, DeviceStatus::Connected);
            record.capabilities = placeholder_local_capabilities();
            record.formats = probe::default_formats();
            record
        }
    }
}

fn placeholder_local_capabilities() -> Capabilities {
    Capabilities {
        driver_name: DEFAULT_DRIVER_NAME.to_string(),
        card_name: DEFAULT_CARD_NAME.to_string(),
        ..Capabilities::default()
    }
}
