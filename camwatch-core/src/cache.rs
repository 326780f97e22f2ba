//! Memoized probe results keyed by device path.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{Capabilities, DeviceFormat};

/// Result of one successful capability probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub capabilities: Capabilities,
    pub formats: Vec<DeviceFormat>,
}

/// Cache of probe results. Entries never expire by time; they are dropped
/// when the device disappears or transitions to the error status.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: RwLock<HashMap<String, ProbeReport>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<ProbeReport> {
        self.entries.read().get(path).cloned()
    }

    pub fn insert(&self, path: &str, report: ProbeReport) {
        self.entries.write().insert(path.to_string(), report);
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.write().remove(path);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(driver: &str) -> ProbeReport {
        ProbeReport {
            capabilities: Capabilities {
                driver_name: driver.to_string(),
                ..Capabilities::default()
            },
            formats: vec![DeviceFormat::new("YUYV", 640, 480, &["30.000"])],
        }
    }

    #[test]
    fn insert_get_invalidate() {
        let cache = CapabilityCache::new();
        assert!(cache.get("/dev/video0").is_none());

        cache.insert("/dev/video0", report("uvcvideo"));
        let cached = cache.get("/dev/video0").unwrap();
        assert_eq!(cached.capabilities.driver_name, "uvcvideo");
        assert_eq!(cache.len(), 1);

        cache.invalidate("/dev/video0");
        assert!(cache.get("/dev/video0").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let cache = CapabilityCache::new();
        cache.insert("/dev/video0", report("old"));
        cache.insert("/dev/video0", report("new"));
        assert_eq!(cache.get("/dev/video0").unwrap().capabilities.driver_name, "new");
        assert_eq!(cache.len(), 1);
    }
}
