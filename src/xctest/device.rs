//! Gesture and capture driver for iOS devices through WebDriverAgent.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::input;
use crate::config::apps::AppRegistry;
use crate::device::{
    settle, Capability, CommandRunner, ConnectionError, DeviceError, Platform, Point, SessionOptions,
    SettleDelays, ToolRunner, ViewportCell,
};
use crate::screenshot::{self, CaptureError, CapturePolicy, FrameSource, Screenshot};

/// Screenshot pixels per WebDriverAgent point on modern iPhones.
pub const SCALE_FACTOR: f64 = 3.0;

/// Thin HTTP client bound to one WebDriverAgent and, optionally, a session.
pub(crate) struct WdaClient {
    http: reqwest::Client,
    base: String,
    session_id: Option<String>,
}

impl WdaClient {
    pub fn new(base: &str, session_id: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            session_id,
        })
    }

    /// `base/session/<id>/<endpoint>`, or `base/<endpoint>` without a session.
    pub fn session_url(&self, endpoint: &str) -> String {
        match &self.session_id {
            Some(id) => format!("{}/session/{}/{}", self.base, id, endpoint),
            None => format!("{}/{}", self.base, endpoint),
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base, endpoint)
    }

    pub async fn get(&self, url: &str) -> Result<Value, DeviceError> {
        let response = self.http.get(url).send().await?;
        Self::decode(response).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value, DeviceError> {
        let request = self.http.post(url);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, DeviceError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DeviceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_body(&body))
    }
}

/// Decode a 2xx body; malformed JSON is logged and read as `Null`.
fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| {
        tracing::debug!("Unparseable WebDriverAgent response ({}): {:.200}", e, body);
        Value::Null
    })
}

/// iOS backend speaking the WebDriverAgent HTTP protocol.
pub struct XcTestDriver {
    client: WdaClient,
    device_id: Option<String>,
    delays: SettleDelays,
    capture: CapturePolicy,
    viewport: ViewportCell,
    registry: Arc<dyn AppRegistry>,
    idevicescreenshot: Arc<dyn CommandRunner>,
}

impl XcTestDriver {
    pub fn new(options: &SessionOptions) -> Result<Self, ConnectionError> {
        Ok(Self {
            client: WdaClient::new(&options.wda_url, options.wda_session_id.clone(), options.command_timeout)?,
            device_id: options.device_id.clone(),
            delays: options.delays,
            capture: options.capture,
            viewport: ViewportCell::new(Platform::XcTest.default_resolution()),
            registry: options.registry_for(Platform::XcTest),
            idevicescreenshot: ToolRunner::shared("idevicescreenshot"),
        })
    }

    /// Use a different runner for the `idevicescreenshot` fallback.
    pub fn with_screenshot_tool(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.idevicescreenshot = runner;
        self
    }

    /// Normalized point to WebDriverAgent points.
    fn points(&self, at: Point) -> (f64, f64) {
        to_points(self.viewport.get().project(at))
    }

    async fn perform(&self, actions: Value) -> Result<(), DeviceError> {
        self.client.post(&self.client.session_url("actions"), Some(&actions)).await?;
        Ok(())
    }

    async fn drag(&self, from: (f64, f64), to: (f64, f64), seconds: f64) -> Result<(), DeviceError> {
        let payload = json!({
            "fromX": from.0,
            "fromY": from.1,
            "toX": to.0,
            "toY": to.1,
            "duration": seconds,
        });
        self.client
            .post(&self.client.session_url("wda/dragfromtoforduration"), Some(&payload))
            .await?;
        Ok(())
    }

    async fn grab_wda(&self) -> Result<Vec<u8>, CaptureError> {
        let data = self
            .client
            .get(&self.client.url("screenshot"))
            .await
            .map_err(|e| match e {
                DeviceError::Http(e) if e.is_timeout() => CaptureError::Timeout,
                other => CaptureError::Failed(other.to_string()),
            })?;

        let encoded = data
            .get("value")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CaptureError::Failed("WebDriverAgent returned no screenshot".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| CaptureError::Failed(format!("Invalid screenshot data: {}", e)))
    }

    async fn grab_idevice(&self, timeout: Duration) -> Result<Vec<u8>, CaptureError> {
        let local = std::env::temp_dir().join(format!("ios_screenshot_{}.png", uuid::Uuid::new_v4()));
        let local_str = local.to_string_lossy().into_owned();

        let mut args = Vec::new();
        if let Some(udid) = &self.device_id {
            args.extend(["-u".to_string(), udid.clone()]);
        }
        args.push(local_str.clone());

        let output = self
            .idevicescreenshot
            .run(&args, timeout)
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?;
        if !output.success() {
            return Err(CaptureError::from_stderr(&output.combined()));
        }

        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| CaptureError::Failed(format!("Could not read {}: {}", local_str, e)))?;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            tracing::debug!("Could not remove {}: {}", local_str, e);
        }
        Ok(bytes)
    }
}

fn to_points((x, y): (i32, i32)) -> (f64, f64) {
    (x as f64 / SCALE_FACTOR, y as f64 / SCALE_FACTOR)
}

/// One-finger W3C pointer sequence at `(x, y)`.
fn pointer_actions((x, y): (f64, f64), steps: Vec<Value>) -> Value {
    let mut actions = vec![json!({"type": "pointerMove", "duration": 0, "x": x, "y": y})];
    actions.extend(steps);
    json!({
        "actions": [{
            "type": "pointer",
            "id": "finger1",
            "parameters": {"pointerType": "touch"},
            "actions": actions,
        }]
    })
}

fn press(hold_ms: u64) -> Vec<Value> {
    vec![
        json!({"type": "pointerDown", "button": 0}),
        json!({"type": "pause", "duration": hold_ms}),
        json!({"type": "pointerUp", "button": 0}),
    ]
}

#[async_trait]
impl FrameSource for XcTestDriver {
    async fn grab(&self, timeout: Duration) -> Result<Vec<u8>, CaptureError> {
        match self.grab_wda().await {
            Ok(bytes) => Ok(bytes),
            Err(wda_err) => {
                tracing::debug!("WDA screenshot failed ({}), trying idevicescreenshot", wda_err);
                self.grab_idevice(timeout).await.map_err(|_| wda_err)
            }
        }
    }
}

#[async_trait]
impl Capability for XcTestDriver {
    fn platform(&self) -> Platform {
        Platform::XcTest
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        self.perform(pointer_actions(self.points(at), press(100))).await?;
        settle(self.delays.tap).await;
        Ok(())
    }

    async fn double_tap(&self, at: Point) -> Result<(), DeviceError> {
        let mut steps = press(100);
        steps.push(json!({"type": "pause", "duration": 100}));
        steps.extend(press(100));
        self.perform(pointer_actions(self.points(at), steps)).await?;
        settle(self.delays.double_tap).await;
        Ok(())
    }

    async fn long_press(&self, at: Point) -> Result<(), DeviceError> {
        let hold = self.delays.long_press_hold.as_millis() as u64;
        self.perform(pointer_actions(self.points(at), press(hold))).await?;
        settle(self.delays.long_press).await;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Option<Duration>) -> Result<(), DeviceError> {
        let viewport = self.viewport.get();
        let start = viewport.project(from);
        let end = viewport.project(to);
        let duration = duration.unwrap_or_else(|| Platform::XcTest.swipe_timing().duration(start, end));

        self.drag(to_points(start), to_points(end), duration.as_secs_f64()).await?;
        settle(self.delays.swipe).await;
        Ok(())
    }

    /// Edge swipe from the left; iOS has no universal back button.
    async fn back(&self) -> Result<(), DeviceError> {
        self.drag((0.0, 640.0), (400.0, 640.0), 0.3).await?;
        settle(self.delays.back).await;
        Ok(())
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.client.post(&self.client.url("wda/homescreen"), None).await?;
        settle(self.delays.home).await;
        Ok(())
    }

    async fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        let Some(bundle_id) = self.registry.resolve(app_name) else {
            tracing::warn!("No bundle id known for app {:?}", app_name);
            return Ok(false);
        };

        self.client
            .post(
                &self.client.session_url("wda/apps/launch"),
                Some(&json!({ "bundleId": bundle_id })),
            )
            .await?;
        settle(self.delays.launch).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        input::type_text(&self.client, text).await?;
        settle(self.delays.text).await;
        Ok(())
    }

    async fn clear_text(&self) -> Result<(), DeviceError> {
        input::clear_text(&self.client).await
    }

    async fn screenshot(&self) -> Screenshot {
        let shot = screenshot::acquire(self, &self.capture, Platform::XcTest).await;
        self.viewport.observe(&shot);
        shot
    }

    async fn current_app(&self) -> String {
        let bundle_id = match self.client.get(&self.client.url("wda/activeAppInfo")).await {
            Ok(data) => data
                .get("value")
                .and_then(|v| v.get("bundleId"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                tracing::debug!("activeAppInfo failed: {}", e);
                None
            }
        };

        bundle_id
            .and_then(|id| self.registry.name_for(&id))
            .unwrap_or_else(|| "System Home".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ShellOutput;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_malformed_body_reads_as_null() {
        assert_eq!(parse_body("<html>502 Bad Gateway</html>"), Value::Null);
        assert_eq!(parse_body(r#"{"value": {"bundleId": "com.apple.Preferences"}}"#)["value"]["bundleId"], "com.apple.Preferences");
    }

    fn offline_driver() -> (Arc<ScriptedRunner>, XcTestDriver) {
        let runner = Arc::new(ScriptedRunner::new("idevicescreenshot"));
        let mut options = SessionOptions::default()
            .with_wda_url("http://127.0.0.1:9/")
            .with_delays(SettleDelays::none());
        options.capture.retry_delay = Duration::ZERO;
        options.command_timeout = Duration::from_secs(2);
        let driver = XcTestDriver::new(&options).unwrap().with_screenshot_tool(runner.clone());
        (runner, driver)
    }

    #[test]
    fn test_session_urls() {
        let client = WdaClient::new("http://localhost:8100/", Some("abc".into()), Duration::from_secs(1)).unwrap();
        assert_eq!(client.session_url("actions"), "http://localhost:8100/session/abc/actions");
        assert_eq!(client.url("wda/homescreen"), "http://localhost:8100/wda/homescreen");

        let client = WdaClient::new("http://localhost:8100", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.session_url("wda/keys"), "http://localhost:8100/wda/keys");
    }

    #[test]
    fn test_pixels_to_points() {
        assert_eq!(to_points((1179, 2556)), (393.0, 852.0));
    }

    #[test]
    fn test_tap_payload() {
        let payload = pointer_actions((100.0, 200.0), press(100));
        let steps = &payload["actions"][0]["actions"];
        assert_eq!(payload["actions"][0]["parameters"]["pointerType"], "touch");
        assert_eq!(steps[0]["x"], 100.0);
        assert_eq!(steps[1]["type"], "pointerDown");
        assert_eq!(steps[2]["duration"], 100);
        assert_eq!(steps[3]["type"], "pointerUp");
    }

    #[tokio::test]
    async fn test_unreachable_wda_degrades() {
        let (runner, driver) = offline_driver();
        for _ in 0..3 {
            runner.push(ShellOutput::failed(1, "ERROR: Could not connect to lockdownd"));
        }

        assert_eq!(driver.current_app().await, "System Home");

        let shot = driver.screenshot().await;
        assert!(shot.fallback.is_some());
        assert_eq!((shot.width, shot.height), (1179, 2556));
        assert_eq!(runner.calls().len(), 3);

        assert!(matches!(driver.home().await, Err(DeviceError::Http(_))));
    }

    #[tokio::test]
    async fn test_unknown_app_is_not_launched() {
        let (_runner, driver) = offline_driver();
        assert!(!driver.launch("Not Installed").await.unwrap());
    }
}
