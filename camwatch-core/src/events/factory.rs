//! Process-wide, reference-counted ownership of the device event source.
//!
//! Kernel watchers are a scarce per-process resource, so every acquirer
//! shares one instance; the last release closes it.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{CameraError, Result};

use super::source::{DeviceEventSource, DeviceEventSourceConfig};

#[derive(Default)]
struct FactoryState {
    source: Option<Arc<DeviceEventSource>>,
    refcount: usize,
}

static FACTORY: Lazy<Mutex<FactoryState>> = Lazy::new(|| Mutex::new(FactoryState::default()));

/// Hands out the shared [`DeviceEventSource`].
#[derive(Debug)]
pub struct SourceFactory;

impl SourceFactory {
    pub fn acquire() -> Arc<DeviceEventSource> {
        Self::acquire_with_config(DeviceEventSourceConfig::default())
    }

    /// The configuration only applies when this call creates the instance;
    /// later acquirers receive the existing source unchanged.
    pub fn acquire_with_config(config: DeviceEventSourceConfig) -> Arc<DeviceEventSource> {
        let mut state = FACTORY.lock();
        let source = match &state.source {
            Some(source) => source.clone(),
            None => {
                let source = Arc::new(DeviceEventSource::new(config));
                state.source = Some(source.clone());
                source
            }
        };
        state.refcount += 1;
        debug!(refcount = state.refcount, "device event source acquired");
        source
    }

    /// Drop one reference; the last holder closes the source. Releasing
    /// below zero is a programming error and fails loudly.
    pub async fn release() -> Result<()> {
        let to_close = {
            let mut state = FACTORY.lock();
            if state.refcount == 0 {
                error!("device event source released more times than acquired");
                return Err(CameraError::Internal(
                    "event source refcount underflow".to_string(),
                ));
            }
            state.refcount -= 1;
            debug!(refcount = state.refcount, "device event source released");
            if state.refcount == 0 {
                state.source.take()
            } else {
                None
            }
        };
        if let Some(source) = to_close {
            source.close().await;
        }
        Ok(())
    }

    /// Force-close and zero the refcount. Test support only.
    #[doc(hidden)]
    pub async fn reset_for_tests() {
        let source = {
            let mut state = FACTORY.lock();
            state.refcount = 0;
            state.source.take()
        };
        if let Some(source) = source {
            source.close().await;
        }
    }
}
