//! Parsers for the line-oriented output of the v4l2 enumeration utility.
//!
//! The grammar is tolerant: missing fields fall back to documented defaults,
//! unknown lines are skipped, and interleaved blank lines are ignored.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CameraError, Result};
use crate::types::{Capabilities, DeviceFormat};

pub const DEFAULT_CARD_NAME: &str = "Unknown Video Device";
pub const DEFAULT_DRIVER_NAME: &str = "unknown";

// [0]: 'YUYV' (YUYV 4:2:2)
static FORMAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\d+\]:\s*'([^']+)'").expect("format regex should compile"));

// Size: Discrete 640x480
static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Size:\s*Discrete\s+(\d+)x(\d+)").expect("size regex should compile"));

// Interval: Discrete 0.033s (30.000 fps)
static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*Interval:\s*Discrete\s+\S+\s*\((\d+(?:\.\d+)?)\s*fps\)")
        .expect("interval regex should compile")
});

/// Parse the `--info` report into a capability record.
///
/// Recognized field prefixes are case-sensitive. Missing card and driver
/// names receive defaults; other missing fields stay empty.
pub fn parse_device_info(text: &str) -> Result<Capabilities> {
    if text.trim().is_empty() {
        return Err(CameraError::Parse("empty device info output".to_string()));
    }

    let mut caps = Capabilities {
        driver_name: DEFAULT_DRIVER_NAME.to_string(),
        card_name: DEFAULT_CARD_NAME.to_string(),
        ..Capabilities::default()
    };

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "Driver name" if !value.is_empty() => caps.driver_name = value.to_string(),
            "Card type" if !value.is_empty() => caps.card_name = value.to_string(),
            "Bus info" => caps.bus_info = value.to_string(),
            "Driver version" => caps.version = value.to_string(),
            "Capabilities" => {
                caps.capabilities = value.split_whitespace().map(str::to_string).collect();
            }
            "Device Caps" => {
                caps.device_caps = value.split_whitespace().map(str::to_string).collect();
            }
            _ => {}
        }
    }

    Ok(caps)
}

/// Parse the `--list-formats-ext` report into one format per
/// (pixel format, width, height).
///
/// Frame-rate tokens are deduplicated within a size, first-seen order
/// preserved. A format block with no size lines yields a single 0x0 entry.
/// An empty input yields an empty list.
pub fn parse_device_formats(text: &str) -> Result<Vec<DeviceFormat>> {
    let mut formats: Vec<DeviceFormat> = Vec::new();
    let mut current_pixel_format: Option<String> = None;
    let mut sizes_in_block = 0usize;

    for line in text.lines() {
        if let Some(captures) = FORMAT_RE.captures(line) {
            flush_sizeless_block(&mut formats, current_pixel_format.take(), sizes_in_block);
            current_pixel_format = Some(captures[1].to_string());
            sizes_in_block = 0;
            continue;
        }

        if let Some(captures) = SIZE_RE.captures(line) {
            let Some(pixel_format) = current_pixel_format.as_deref() else {
                continue;
            };
            let width = captures[1].parse().unwrap_or(0);
            let height = captures[2].parse().unwrap_or(0);
            formats.push(DeviceFormat {
                pixel_format: pixel_format.to_string(),
                width,
                height,
                frame_rates: Vec::new(),
            });
            sizes_in_block += 1;
            continue;
        }

        if let Some(captures) = INTERVAL_RE.captures(line) {
            if sizes_in_block == 0 {
                continue;
            }
            if let Some(format) = formats.last_mut() {
                let fps = captures[1].to_string();
                if !format.frame_rates.contains(&fps) {
                    format.frame_rates.push(fps);
                }
            }
        }
    }

    flush_sizeless_block(&mut formats, current_pixel_format, sizes_in_block);
    Ok(formats)
}

/// Extract all frame-rate tokens from a report, first-seen order, deduped.
pub fn parse_frame_rates(text: &str) -> Result<Vec<String>> {
    let mut rates = Vec::new();
    for line in text.lines() {
        if let Some(captures) = INTERVAL_RE.captures(line) {
            let fps = captures[1].to_string();
            if !rates.contains(&fps) {
                rates.push(fps);
            }
        }
    }
    Ok(rates)
}

fn flush_sizeless_block(
    formats: &mut Vec<DeviceFormat>,
    pixel_format: Option<String>,
    sizes_in_block: usize,
) {
    if let Some(pixel_format) = pixel_format
        && sizes_in_block == 0
    {
        formats.push(DeviceFormat {
            pixel_format,
            width: 0,
            height: 0,
            frame_rates: Vec::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_SAMPLE: &str = "Driver name : uvcvideo\nCard type : USB Camera\nBus info : usb-0000:00:14.0-1\nDriver version : 5.15.0\nCapabilities : 0x85200001 0x04200001\nDevice Caps : 0x04200001";

    #[test]
    fn parses_full_device_info() {
        let caps = parse_device_info(INFO_SAMPLE).unwrap();
        assert_eq!(caps.driver_name, "uvcvideo");
        assert_eq!(caps.card_name, "USB Camera");
        assert_eq!(caps.bus_info, "usb-0000:00:14.0-1");
        assert_eq!(caps.version, "5.15.0");
        assert_eq!(caps.capabilities.len(), 2);
        assert_eq!(caps.device_caps.len(), 1);
    }

    #[test]
    fn missing_fields_receive_defaults() {
        let caps = parse_device_info("Bus info : pci:0000:00:1f.0\n").unwrap();
        assert_eq!(caps.driver_name, DEFAULT_DRIVER_NAME);
        assert_eq!(caps.card_name, DEFAULT_CARD_NAME);
        assert_eq!(caps.bus_info, "pci:0000:00:1f.0");
        assert!(caps.capabilities.is_empty());
    }

    #[test]
    fn empty_info_is_a_parse_error() {
        assert!(matches!(
            parse_device_info("  \n  "),
            Err(CameraError::Parse(_))
        ));
    }

    #[test]
    fn info_is_tolerant_of_noise() {
        let text = "\n\n   garbage line without separator\nDriver name   :   uvcvideo  \n\n";
        let caps = parse_device_info(text).unwrap();
        assert_eq!(caps.driver_name, "uvcvideo");
    }

    #[test]
    fn parses_formats_with_shared_rates() {
        let text = "\
ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.050s (20.000 fps)
\t\tSize: Discrete 320x240
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.050s (20.000 fps)
";
        let formats = parse_device_formats(text).unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].pixel_format, "YUYV");
        assert_eq!((formats[0].width, formats[0].height), (640, 480));
        assert_eq!(formats[0].frame_rates, vec!["30.000", "20.000"]);
        assert_eq!((formats[1].width, formats[1].height), (320, 240));
        assert_eq!(formats[1].frame_rates, vec!["30.000", "20.000"]);
    }

    #[test]
    fn multiple_format_blocks() {
        let text = "\
\t[0]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t[1]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.067s (15.000 fps)
";
        let formats = parse_device_formats(text).unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[1].pixel_format, "MJPG");
        assert_eq!(formats[1].frame_rates, vec!["30.000", "15.000"]);
    }

    #[test]
    fn duplicate_rates_within_a_size_are_deduped() {
        let text = "\
\t[0]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.033s (30.000 fps)
";
        let formats = parse_device_formats(text).unwrap();
        assert_eq!(formats[0].frame_rates, vec!["30.000"]);
    }

    #[test]
    fn sizeless_format_block_yields_zero_dimensions() {
        let text = "\t[0]: 'H264' (H.264, compressed)\n";
        let formats = parse_device_formats(text).unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].pixel_format, "H264");
        assert_eq!((formats[0].width, formats[0].height), (0, 0));
        assert!(formats[0].frame_rates.is_empty());
    }

    #[test]
    fn empty_format_listing_is_empty_not_error() {
        assert!(parse_device_formats("").unwrap().is_empty());
    }

    #[test]
    fn frame_rates_are_collected_in_order() {
        let text = "\
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.040s (25.000 fps)
\t\t\tInterval: Discrete 0.033s (30.000 fps)
";
        let rates = parse_frame_rates(text).unwrap();
        assert_eq!(rates, vec!["30.000", "25.000"]);
    }
}
