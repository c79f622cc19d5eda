//! Gesture and capture driver for HarmonyOS devices over HDC.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::connection::hdc_prefix;
use super::input;
use crate::config::apps::AppRegistry;
use crate::device::{
    settle, ArtifactStore, Capability, CommandRunner, DeviceError, Platform, Point, SessionOptions,
    SettleDelays, ShellArtifacts, ShellError, ShellTarget, ViewportCell,
};
use crate::screenshot::{self, CaptureError, CapturePolicy, FrameSource, Screenshot};

const DEFAULT_ABILITY: &str = "EntryAbility";

/// HarmonyOS backend: `uitest uiInput` gestures, `aa start` launches and
/// JPEG capture pulled back with `file recv`.
pub struct HdcDriver {
    target: ShellTarget,
    delays: SettleDelays,
    capture: CapturePolicy,
    viewport: ViewportCell,
    registry: Arc<dyn AppRegistry>,
    artifacts: ShellArtifacts,
}

impl HdcDriver {
    pub fn new(runner: Arc<dyn CommandRunner>, options: &SessionOptions) -> Self {
        let target = ShellTarget::new(
            runner,
            hdc_prefix(options.device_id.as_deref()),
            options.command_timeout,
        );
        Self {
            artifacts: ShellArtifacts::new(target.clone()),
            target,
            delays: options.delays,
            capture: options.capture,
            viewport: ViewportCell::new(Platform::Hdc.default_resolution()),
            registry: options.registry_for(Platform::Hdc),
        }
    }

    fn pixels(&self, at: Point) -> (String, String) {
        let (x, y) = self.viewport.get().project(at);
        (x.to_string(), y.to_string())
    }

    async fn ui_input(&self, args: &[&str]) -> Result<(), DeviceError> {
        let mut full = vec!["uitest", "uiInput"];
        full.extend_from_slice(args);
        self.target.exec(&full).await?;
        Ok(())
    }

    /// Write the frame to `remote`, trying the older `snapshot_display` when
    /// `screenshot` is unavailable.
    async fn capture_remote(&self, remote: &str, timeout: Duration) -> Result<(), CaptureError> {
        let output = self
            .target
            .shell_with(&["screenshot", remote], timeout)
            .await
            .map_err(capture_error)?;
        let text = output.combined().to_lowercase();
        if !(text.contains("fail") || text.contains("error") || text.contains("not found")) {
            return Ok(());
        }

        let output = self
            .target
            .shell_with(&["snapshot_display", "-f", remote], timeout)
            .await
            .map_err(capture_error)?;
        let text = output.combined();
        let lower = text.to_lowercase();
        if lower.contains("fail") || lower.contains("error") {
            return Err(CaptureError::Denied(text.trim().to_string()));
        }
        Ok(())
    }
}

fn capture_error(e: ShellError) -> CaptureError {
    match e {
        ShellError::Timeout(_) => CaptureError::Timeout,
        other => CaptureError::Failed(other.to_string()),
    }
}

fn host_temp_path() -> PathBuf {
    std::env::temp_dir().join(format!("screenshot_{}.jpeg", uuid::Uuid::new_v4()))
}

#[async_trait]
impl FrameSource for HdcDriver {
    async fn grab(&self, timeout: Duration) -> Result<Vec<u8>, CaptureError> {
        let remote = Platform::Hdc
            .scratch_path()
            .unwrap_or("/data/local/tmp/tmp_screenshot.jpeg");
        self.capture_remote(remote, timeout).await?;

        let local = host_temp_path();
        let local_str = local.to_string_lossy().into_owned();
        self.target
            .run_with(&["file", "recv", remote, &local_str], timeout)
            .await
            .map_err(capture_error)?;

        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| CaptureError::Failed(format!("Could not read {}: {}", local_str, e)))?;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            tracing::debug!("Could not remove {}: {}", local_str, e);
        }

        Ok(bytes)
    }
}

#[async_trait]
impl Capability for HdcDriver {
    fn platform(&self) -> Platform {
        Platform::Hdc
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        let (x, y) = self.pixels(at);
        self.ui_input(&["click", &x, &y]).await?;
        settle(self.delays.tap).await;
        Ok(())
    }

    async fn double_tap(&self, at: Point) -> Result<(), DeviceError> {
        let (x, y) = self.pixels(at);
        self.ui_input(&["doubleClick", &x, &y]).await?;
        settle(self.delays.double_tap).await;
        Ok(())
    }

    async fn long_press(&self, at: Point) -> Result<(), DeviceError> {
        // longClick has a fixed hold on HarmonyOS.
        let (x, y) = self.pixels(at);
        self.ui_input(&["longClick", &x, &y]).await?;
        settle(self.delays.long_press).await;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Option<Duration>) -> Result<(), DeviceError> {
        let viewport = self.viewport.get();
        let start = viewport.project(from);
        let end = viewport.project(to);
        let duration = duration.unwrap_or_else(|| Platform::Hdc.swipe_timing().duration(start, end));

        self.ui_input(&[
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
        self.ui_input(&["keyEvent", "Back"]).await?;
        settle(self.delays.back).await;
        Ok(())
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.ui_input(&["keyEvent", "Home"]).await?;
        settle(self.delays.home).await;
        Ok(())
    }

    async fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        let Some(bundle) = self.registry.resolve(app_name) else {
            tracing::warn!("[HDC] App {:?} not found in HarmonyOS app list", app_name);
            return Ok(false);
        };
        let ability = self
            .registry
            .entry_point(&bundle)
            .unwrap_or_else(|| DEFAULT_ABILITY.to_string());

        self.target
            .exec(&["aa", "start", "-b", &bundle, "-a", &ability])
            .await?;
        settle(self.delays.launch).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        input::clear_text(&self.target).await?;
        settle(self.delays.text).await;

        input::type_text(&self.target, text).await?;
        settle(self.delays.text).await;
        Ok(())
    }

    async fn clear_text(&self) -> Result<(), DeviceError> {
        input::clear_text(&self.target).await
    }

    async fn screenshot(&self) -> Screenshot {
        let shot = screenshot::acquire(self, &self.capture, Platform::Hdc).await;
        self.viewport.observe(&shot);
        shot
    }

    async fn current_app(&self) -> String {
        let output = match self
            .target
            .shell(&["hidumper", "-s", "WindowManagerService", "-a", "-a"])
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("hidumper failed: {}", e);
                return "System Home".to_string();
            }
        };

        focused_app(&output.stdout_text(), self.registry.as_ref()).unwrap_or_else(|| "System Home".to_string())
    }

    fn scratch_artifact(&self) -> Option<&dyn ArtifactStore> {
        Some(&self.artifacts)
    }
}

/// Match bundle names on the lines mentioning focus.
fn focused_app(dump: &str, registry: &dyn AppRegistry) -> Option<String> {
    dump.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("focused") || lower.contains("current")
        })
        .flat_map(|line| line.split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_')))
        .filter(|word| word.contains('.'))
        .find_map(|word| registry.name_for(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::apps::StaticRegistry;
    use crate::device::ShellOutput;
    use crate::testing::ScriptedRunner;

    fn driver() -> (Arc<ScriptedRunner>, HdcDriver) {
        let runner = Arc::new(ScriptedRunner::new("hdc"));
        let options = SessionOptions::default()
            .with_device_id("FMR0")
            .with_delays(SettleDelays::none());
        let driver = HdcDriver::new(runner.clone(), &options);
        (runner, driver)
    }

    #[tokio::test]
    async fn test_gestures_use_uitest() {
        let (runner, driver) = driver();
        driver.tap(Point::new(500, 500)).await.unwrap();
        driver.double_tap(Point::new(100, 100)).await.unwrap();
        driver.back().await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "-t FMR0 shell uitest uiInput click 540 1200",
                "-t FMR0 shell uitest uiInput doubleClick 108 240",
                "-t FMR0 shell uitest uiInput keyEvent Back",
            ]
        );
    }

    #[tokio::test]
    async fn test_swipe_clamped_for_harmony() {
        let (runner, driver) = driver();
        driver.swipe(Point::new(500, 900), Point::new(500, 100), None).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec!["-t FMR0 shell uitest uiInput swipe 540 2160 540 240 1000"]
        );
    }

    #[tokio::test]
    async fn test_launch_uses_entry_point() {
        let (runner, driver) = driver();
        assert!(driver.launch("微信").await.unwrap());
        assert!(!driver.launch("Unknown App").await.unwrap());
        assert_eq!(
            runner.calls(),
            vec!["-t FMR0 shell aa start -b com.tencent.wechat -a EntryAbility"]
        );
    }

    #[tokio::test]
    async fn test_capture_failure_markers_are_denied() {
        let (runner, driver) = driver();
        runner.push_stdout("screenshot: not found\n");
        runner.push_stdout("snapshot_display fail: permission\n");

        let err = driver.grab(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CaptureError::Denied(_)));
        assert_eq!(
            runner.calls(),
            vec![
                "-t FMR0 shell screenshot /data/local/tmp/tmp_screenshot.jpeg",
                "-t FMR0 shell snapshot_display -f /data/local/tmp/tmp_screenshot.jpeg",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_pulled_file_is_failure() {
        let (runner, driver) = driver();
        runner.push(ShellOutput::ok("Screenshot saved\n"));
        runner.push(ShellOutput::ok("FileTransfer finish"));

        // The scripted runner never writes the local file.
        let err = driver.grab(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CaptureError::Failed(_)));
    }

    #[test]
    fn test_focused_app_lookup() {
        let registry = StaticRegistry::for_platform(Platform::Hdc);
        let dump = "Focus window: 12\n  [current] bundleName=com.tencent.wechat, abilityName=EntryAbility\n";
        assert_eq!(focused_app(dump, &registry).as_deref(), Some("微信"));
        assert_eq!(focused_app("nothing focused here\n", &registry), None);
    }
}
