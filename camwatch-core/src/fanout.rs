//! Delivery of lifecycle events to registered handlers and raw callbacks.
//!
//! Every registration gets its own delivery lane: events arrive serially per
//! handler, handlers run in parallel with each other, and a panicking
//! handler loses only its own invocation.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::types::LifecycleEvent;

/// Receives lifecycle events on a dedicated delivery task.
pub trait LifecycleEventHandler: Send + Sync {
    fn handle_event(&self, event: &LifecycleEvent);
}

/// Raw callback form of [`LifecycleEventHandler`].
pub type LifecycleCallback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Downstream notifier seam for RPC integration.
pub trait EventNotifier: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

struct CallbackHandler {
    callback: LifecycleCallback,
}

impl LifecycleEventHandler for CallbackHandler {
    fn handle_event(&self, event: &LifecycleEvent) {
        (self.callback)(event);
    }
}

struct HandlerLane {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

/// Fans lifecycle events out to all registered handlers.
pub struct EventFanout {
    lanes: RwLock<Vec<HandlerLane>>,
    tracker: TaskTracker,
}

impl fmt::Debug for EventFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFanout")
            .field("lanes", &self.lanes.try_read().map(|l| l.len()).unwrap_or(0))
            .finish()
    }
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFanout {
    pub fn new() -> Self {
        Self {
            lanes: RwLock::new(Vec::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub async fn add_handler(&self, handler: Arc<dyn LifecycleEventHandler>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleEvent>();
        self.tracker.spawn(async move {
            while let Some(event) = rx.recv().await {
                let handler = handler.clone();
                let delivered =
                    std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle_event(&event)));
                if delivered.is_err() {
                    warn!(
                        device_path = %event.device_path,
                        "lifecycle handler panicked, event dropped for this handler"
                    );
                }
            }
        });
        self.lanes.write().await.push(HandlerLane { tx });
    }

    pub async fn add_callback(&self, callback: LifecycleCallback) {
        self.add_handler(Arc::new(CallbackHandler { callback })).await;
    }

    pub async fn handler_count(&self) -> usize {
        self.lanes.read().await.len()
    }

    /// Queue `event` on every lane. Delivery order across lanes is
    /// unspecified; within a lane it follows publish order.
    pub async fn publish(&self, event: &LifecycleEvent) {
        let lanes = self.lanes.read().await;
        for lane in lanes.iter() {
            let _ = lane.tx.send(event.clone());
        }
    }

    /// Drop all registrations and wait for the delivery lanes to drain.
    pub async fn shutdown(&self) {
        self.lanes.write().await.clear();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Capabilities, DeviceRecord, DeviceStatus, LifecycleEventKind,
    };
    use parking_lot::Mutex;

    fn event(path: &str) -> LifecycleEvent {
        LifecycleEvent::new(
            LifecycleEventKind::Connected,
            DeviceRecord {
                path: path.to_string(),
                name: path.to_string(),
                device_number: None,
                status: DeviceStatus::Connected,
                last_seen: chrono::Utc::now(),
                last_error: None,
                capabilities: Capabilities::default(),
                formats: Vec::new(),
            },
        )
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl LifecycleEventHandler for Recorder {
        fn handle_event(&self, event: &LifecycleEvent) {
            self.seen.lock().push(event.device_path.clone());
        }
    }

    struct Panicker;

    impl LifecycleEventHandler for Panicker {
        fn handle_event(&self, _event: &LifecycleEvent) {
            panic!("handler exploded");
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order_per_handler() {
        let fanout = EventFanout::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        fanout.add_handler(recorder.clone()).await;

        fanout.publish(&event("/dev/video0")).await;
        fanout.publish(&event("/dev/video1")).await;
        fanout.publish(&event("/dev/video2")).await;
        fanout.shutdown().await;

        assert_eq!(
            *recorder.seen.lock(),
            vec!["/dev/video0", "/dev/video1", "/dev/video2"]
        );
    }

    #[tokio::test]
    async fn panicking_handler_does_not_starve_others() {
        let fanout = EventFanout::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        fanout.add_handler(Arc::new(Panicker)).await;
        fanout.add_handler(recorder.clone()).await;

        fanout.publish(&event("/dev/video0")).await;
        fanout.publish(&event("/dev/video1")).await;
        fanout.shutdown().await;

        assert_eq!(*recorder.seen.lock(), vec!["/dev/video0", "/dev/video1"]);
    }

    #[tokio::test]
    async fn callbacks_are_invoked() {
        let fanout = EventFanout::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        fanout
            .add_callback(Arc::new(move |event: &LifecycleEvent| {
                seen_in_callback.lock().push(event.device_path.clone());
            }))
            .await;

        fanout.publish(&event("/dev/video7")).await;
        fanout.shutdown().await;

        assert_eq!(*seen.lock(), vec!["/dev/video7"]);
    }
}
