//! Device event sourcing: backend selection, the directory watcher, and the
//! process-wide factory that owns it.

pub mod backend;
pub mod factory;
pub mod source;

pub use backend::{EventBackend, detect_event_backend, running_in_container};
pub use factory::SourceFactory;
pub use source::{DEFAULT_EVENT_CAPACITY, DeviceEventSource, DeviceEventSourceConfig};
