//! Selection of the device-event backend for the host environment.
//!
//! Containers rarely expose the udev control socket, so they watch the
//! device directory instead. Bare metal prefers udev when it is present.

use std::path::Path;

/// Available notification backends for device arrivals and departures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBackend {
    /// Kernel device notifications via the udev socket.
    Udev,
    /// Filesystem notifications on the device directory.
    Fsnotify,
}

impl EventBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventBackend::Udev => "udev",
            EventBackend::Fsnotify => "fsnotify",
        }
    }
}

impl std::fmt::Display for EventBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the backend for this host. Deterministic given the environment.
pub fn detect_event_backend() -> EventBackend {
    detect_event_backend_at(Path::new("/"))
}

fn detect_event_backend_at(root: &Path) -> EventBackend {
    if running_in_container_at(root) {
        return EventBackend::Fsnotify;
    }
    if root.join("run/udev/control").exists() {
        EventBackend::Udev
    } else {
        EventBackend::Fsnotify
    }
}

/// True when the process appears to run inside a container.
pub fn running_in_container() -> bool {
    running_in_container_at(Path::new("/"))
}

fn running_in_container_at(root: &Path) -> bool {
    if root.join(".dockerenv").exists() {
        return true;
    }
    match std::fs::read_to_string(root.join("proc/1/cgroup")) {
        Ok(contents) => ["docker", "containerd", "kubepods", "lxc"]
            .iter()
            .any(|marker| contents.contains(marker)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn docker_marker_forces_fsnotify() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(".dockerenv"), "").unwrap();
        fs::create_dir_all(root.path().join("run/udev")).unwrap();
        fs::write(root.path().join("run/udev/control"), "").unwrap();

        assert!(running_in_container_at(root.path()));
        assert_eq!(detect_event_backend_at(root.path()), EventBackend::Fsnotify);
    }

    #[test]
    fn cgroup_marker_forces_fsnotify() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("proc/1")).unwrap();
        fs::write(
            root.path().join("proc/1/cgroup"),
            "0::/kubepods/besteffort/pod1234\n",
        )
        .unwrap();

        assert_eq!(detect_event_backend_at(root.path()), EventBackend::Fsnotify);
    }

    #[test]
    fn bare_metal_with_udev_socket_picks_udev() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("run/udev")).unwrap();
        fs::write(root.path().join("run/udev/control"), "").unwrap();

        assert_eq!(detect_event_backend_at(root.path()), EventBackend::Udev);
    }

    #[test]
    fn bare_metal_without_udev_falls_back_to_fsnotify() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(detect_event_backend_at(root.path()), EventBackend::Fsnotify);
    }
}
