//! Gesture and capture driver for Android devices over ADB.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use super::connection::adb_prefix;
use super::input;
use crate::config::apps::AppRegistry;
use crate::device::{
    settle, ArtifactStore, Capability, CommandRunner, DeviceError, Platform, Point, SessionOptions,
    SettleDelays, ShellArtifacts, ShellError, ShellTarget, ViewportCell,
};
use crate::screenshot::{self, CaptureError, CapturePolicy, FrameSource, Screenshot};

/// `mCurrentFocus=Window{… u0 com.tencent.mm/com.tencent.mm.ui.LauncherUI}`
static FOCUSED_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][\w]*(?:\.[\w]+)+)/").expect("valid regex"));

const KEYCODE_BACK: &str = "4";
const KEYCODE_HOME: &str = "KEYCODE_HOME";

/// Android backend: `adb shell input …` gestures, `screencap` capture and
/// ADB Keyboard text entry.
pub struct AdbDriver {
    target: ShellTarget,
    delays: SettleDelays,
    capture: CapturePolicy,
    viewport: ViewportCell,
    registry: Arc<dyn AppRegistry>,
    artifacts: ShellArtifacts,
}

impl AdbDriver {
    pub fn new(runner: Arc<dyn CommandRunner>, options: &SessionOptions) -> Self {
        let target = ShellTarget::new(
            runner,
            adb_prefix(options.device_id.as_deref()),
            options.command_timeout,
        );
        Self {
            artifacts: ShellArtifacts::new(target.clone()),
            target,
            delays: options.delays,
            capture: options.capture,
            viewport: ViewportCell::new(Platform::Adb.default_resolution()),
            registry: options.registry_for(Platform::Adb),
        }
    }

    fn pixels(&self, at: Point) -> (String, String) {
        let (x, y) = self.viewport.get().project(at);
        (x.to_string(), y.to_string())
    }

    async fn keyevent(&self, code: &str) -> Result<(), DeviceError> {
        self.target.exec(&["input", "keyevent", code]).await?;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for AdbDriver {
    async fn grab(&self, timeout: Duration) -> Result<Vec<u8>, CaptureError> {
        let scratch = Platform::Adb.scratch_path().unwrap_or("/sdcard/tmp.png");

        let output = self
            .target
            .shell_with(&["screencap", "-p", scratch], timeout)
            .await
            .map_err(capture_error)?;
        let combined = output.combined();
        if !output.success() || combined.contains("Status: -1") || combined.contains("Permission denied") {
            return Err(CaptureError::from_stderr(&combined));
        }

        let output = self
            .target
            .run_with(&["exec-out", "cat", scratch], timeout)
            .await
            .map_err(capture_error)?;
        if !output.success() || output.stdout.is_empty() {
            return Err(CaptureError::Failed(format!(
                "Could not pull {}: {}",
                scratch,
                output.stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

fn capture_error(e: ShellError) -> CaptureError {
    match e {
        ShellError::Timeout(_) => CaptureError::Timeout,
        other => CaptureError::Failed(other.to_string()),
    }
}

#[async_trait]
impl Capability for AdbDriver {
    fn platform(&self) -> Platform {
        Platform::Adb
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        let (x, y) = self.pixels(at);
        self.target.exec(&["input", "tap", &x, &y]).await?;
        settle(self.delays.tap).await;
        Ok(())
    }

    async fn double_tap(&self, at: Point) -> Result<(), DeviceError> {
        let (x, y) = self.pixels(at);
        self.target.exec(&["input", "tap", &x, &y]).await?;
        settle(self.delays.double_tap_gap).await;
        self.target.exec(&["input", "tap", &x, &y]).await?;
        settle(self.delays.double_tap).await;
        Ok(())
    }

    async fn long_press(&self, at: Point) -> Result<(), DeviceError> {
        let (x, y) = self.pixels(at);
        let hold = self.delays.long_press_hold.as_millis().to_string();
        self.target.exec(&["input", "swipe", &x, &y, &x, &y, &hold]).await?;
        settle(self.delays.long_press).await;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Option<Duration>) -> Result<(), DeviceError> {
        let viewport = self.viewport.get();
        let start = viewport.project(from);
        let end = viewport.project(to);
        let duration = duration.unwrap_or_else(|| Platform::Adb.swipe_timing().duration(start, end));

        self.target
            .exec(&[
                "input",
                "swipe",
                &start.0.to_string(),
                &start.1.to_string(),
                &end.0.to_string(),
                &end.1.to_string(),
                &duration.as_millis().to_string(),
            ])
            .await?;
        settle(self.delays.swipe).await;
        Ok(())
    }

    async fn back(&self) -> Result<(), DeviceError> {
        self.keyevent(KEYCODE_BACK).await?;
        settle(self.delays.back).await;
        Ok(())
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.keyevent(KEYCODE_HOME).await?;
        settle(self.delays.home).await;
        Ok(())
    }

    async fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        let Some(package) = self.registry.resolve(app_name) else {
            tracing::warn!("No package known for app {:?}", app_name);
            return Ok(false);
        };

        self.target
            .exec(&[
                "monkey",
                "-p",
                &package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        settle(self.delays.launch).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        let original_ime = input::detect_and_set_adb_keyboard(&self.target).await?;
        settle(self.delays.text).await;

        input::clear_text(&self.target).await?;
        settle(self.delays.text).await;

        input::type_text(&self.target, text).await?;
        settle(self.delays.text).await;

        input::restore_keyboard(&self.target, &original_ime).await?;
        settle(self.delays.text).await;
        Ok(())
    }

    async fn clear_text(&self) -> Result<(), DeviceError> {
        input::clear_text(&self.target).await
    }

    async fn screenshot(&self) -> Screenshot {
        let shot = screenshot::acquire(self, &self.capture, Platform::Adb).await;
        self.viewport.observe(&shot);
        shot
    }

    async fn current_app(&self) -> String {
        let output = match self.target.shell(&["dumpsys", "window"]).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("dumpsys window failed: {}", e);
                return "System Home".to_string();
            }
        };

        focused_app(&output.stdout_text(), self.registry.as_ref()).unwrap_or_else(|| "System Home".to_string())
    }

    fn scratch_artifact(&self) -> Option<&dyn ArtifactStore> {
        Some(&self.artifacts)
    }
}

fn focused_app(dumpsys: &str, registry: &dyn AppRegistry) -> Option<String> {
    dumpsys
        .lines()
        .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
        .filter_map(|line| FOCUSED_PACKAGE.captures(line))
        .find_map(|caps| registry.name_for(&caps[1]))
}
