//! Capability probing through the external v4l2 enumeration utility.

pub mod parser;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::ProbeReport;
use crate::error::{CameraError, Result};
use crate::types::DeviceFormat;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the enumeration utility against a device and returns its stdout.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        device_path: &str,
        args: &[&str],
    ) -> Result<String>;
}

/// Executor that shells out to `v4l2-ctl`.
#[derive(Debug, Clone)]
pub struct V4l2CtlExecutor {
    binary: String,
}

impl Default for V4l2CtlExecutor {
    fn default() -> Self {
        Self {
            binary: "v4l2-ctl".to_string(),
        }
    }
}

impl V4l2CtlExecutor {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl CommandExecutor for V4l2CtlExecutor {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        device_path: &str,
        args: &[&str],
    ) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--device")
            .arg(device_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CameraError::ResourceUnavailable(format!("{} not found", self.binary))
            } else {
                CameraError::Io(err)
            }
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(CameraError::Io)?,
            _ = ctx.cancelled() => {
                return Err(CameraError::Cancelled(format!(
                    "{} {}",
                    self.binary, device_path
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::CommandFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Probes one device for capabilities and supported formats under a deadline.
pub struct DeviceProbe {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl std::fmt::Debug for DeviceProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProbe")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeviceProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_PROBE_TIMEOUT
        } else {
            timeout
        };
        Self { executor, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run both enumeration passes against `device_path`.
    ///
    /// The deadline covers the whole probe. A failed or empty format listing
    /// falls back to the default format set; a failed info pass fails the
    /// probe.
    pub async fn probe(&self, ctx: &CancellationToken, device_path: &str) -> Result<ProbeReport> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        let info = tokio::time::timeout_at(
            deadline,
            self.executor.execute(ctx, device_path, &["--info"]),
        )
        .await
        .map_err(|_| CameraError::TimedOut(format!("probe {device_path}")))??;
        let capabilities = parser::parse_device_info(&info)?;

        let formats = match tokio::time::timeout_at(
            deadline,
            self.executor
                .execute(ctx, device_path, &["--list-formats-ext"]),
        )
        .await
        {
            Ok(Ok(output)) => {
                let parsed = parser::parse_device_formats(&output)?;
                if parsed.is_empty() {
                    debug!(device = device_path, "format listing empty, using defaults");
                    default_formats()
                } else {
                    parsed
                }
            }
            Ok(Err(err)) => {
                warn!(device = device_path, error = %err, "format listing failed, using defaults");
                default_formats()
            }
            Err(_) => {
                warn!(device = device_path, "format listing timed out, using defaults");
                default_formats()
            }
        };

        Ok(ProbeReport {
            capabilities,
            formats,
        })
    }

    /// Probe with bounded retries, sleeping `retry_interval` between
    /// attempts. Cancellation ends the retry loop immediately.
    pub async fn probe_with_retry(
        &self,
        ctx: &CancellationToken,
        device_path: &str,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Result<ProbeReport> {
        let mut attempt = 0u32;
        loop {
            match self.probe(ctx, device_path).await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < max_retries && err.is_transient() && !ctx.is_cancelled() => {
                    attempt += 1;
                    debug!(
                        device = device_path,
                        attempt,
                        error = %err,
                        "probe failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Formats assumed when a device refuses to enumerate its own.
pub fn default_formats() -> Vec<DeviceFormat> {
    vec![
        DeviceFormat::new("YUYV", 640, 480, &["30.000", "25.000"]),
        DeviceFormat::new("MJPG", 1280, 720, &["30.000", "25.000", "15.000"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const INFO: &str = "Driver name : uvcvideo\nCard type : USB Camera\nBus info : usb-1\nDriver version : 5.15.0\nCapabilities : 0x85200001\nDevice Caps : 0x04200001";

    const FORMATS: &str = "\t[0]: 'MJPG' (Motion-JPEG)\n\t\tSize: Discrete 1920x1080\n\t\t\tInterval: Discrete 0.033s (30.000 fps)\n";

    /// One canned reply per enumeration pass, plus an optional delay.
    struct ScriptedExecutor {
        info: Mutex<Option<Result<String>>>,
        formats: Mutex<Option<Result<String>>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new(info: Result<String>, formats: Result<String>) -> Self {
            Self {
                info: Mutex::new(Some(info)),
                formats: Mutex::new(Some(formats)),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _device_path: &str,
            args: &[&str],
        ) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let slot = if args.contains(&"--info") {
                &self.info
            } else {
                &self.formats
            };
            slot.lock().unwrap().take().expect("unexpected extra call")
        }
    }

    #[tokio::test]
    async fn probe_parses_both_passes() {
        let executor = ScriptedExecutor::new(Ok(INFO.to_string()), Ok(FORMATS.to_string()));
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_secs(1));
        let report = probe
            .probe(&CancellationToken::new(), "/dev/video0")
            .await
            .unwrap();

        assert_eq!(report.capabilities.driver_name, "uvcvideo");
        assert_eq!(report.formats.len(), 1);
        assert_eq!(report.formats[0].pixel_format, "MJPG");
    }

    #[tokio::test]
    async fn failed_format_listing_falls_back_to_defaults() {
        let executor = ScriptedExecutor::new(
            Ok(INFO.to_string()),
            Err(CameraError::CommandFailed("exit 1".to_string())),
        );
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_secs(1));
        let report = probe
            .probe(&CancellationToken::new(), "/dev/video0")
            .await
            .unwrap();

        assert_eq!(report.formats, default_formats());
    }

    #[tokio::test]
    async fn empty_format_listing_falls_back_to_defaults() {
        let executor = ScriptedExecutor::new(Ok(INFO.to_string()), Ok(String::new()));
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_secs(1));
        let report = probe
            .probe(&CancellationToken::new(), "/dev/video0")
            .await
            .unwrap();

        assert_eq!(report.formats, default_formats());
    }

    #[tokio::test]
    async fn failed_info_pass_fails_the_probe() {
        let executor = ScriptedExecutor::new(
            Err(CameraError::ResourceUnavailable("v4l2-ctl".to_string())),
            Ok(String::new()),
        );
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_secs(1));
        let result = probe.probe(&CancellationToken::new(), "/dev/video0").await;

        assert!(matches!(result, Err(CameraError::ResourceUnavailable(_))));
    }

    #[tokio::test]
    async fn slow_info_pass_times_out() {
        let executor = ScriptedExecutor {
            info: Mutex::new(Some(Ok(INFO.to_string()))),
            formats: Mutex::new(Some(Ok(String::new()))),
            delay: Some(Duration::from_millis(250)),
        };
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_millis(50));
        let result = probe.probe(&CancellationToken::new(), "/dev/video0").await;

        assert!(matches!(result, Err(CameraError::TimedOut(_))));
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_transient_errors() {
        let executor = ScriptedExecutor::new(
            Err(CameraError::Parse("garbage".to_string())),
            Ok(String::new()),
        );
        let probe = DeviceProbe::new(Arc::new(executor), Duration::from_secs(1));
        let result = probe
            .probe_with_retry(
                &CancellationToken::new(),
                "/dev/video0",
                3,
                Duration::from_millis(1),
            )
            .await;

        assert!(matches!(result, Err(CameraError::Parse(_))));
    }
}
