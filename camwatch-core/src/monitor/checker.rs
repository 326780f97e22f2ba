use std::path::Path;

/// Existence check for local device nodes and file sources.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceChecker: Send + Sync {
    fn exists(&self, path: &str) -> bool;
}

/// Checker backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealDeviceChecker;

impl DeviceChecker for RealDeviceChecker {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}
