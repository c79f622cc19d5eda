//! iOS device discovery (libimobiledevice) and WebDriverAgent sessions.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::device::connection::DEFAULT_TOOL_TIMEOUT;
use crate::device::{CommandRunner, ConnectionError, ConnectionKind, ConnectionManager, DeviceInfo, ToolRunner};

pub const DEFAULT_WDA_URL: &str = "http://localhost:8100";

/// Manages iOS devices through `idevice_id`/`ideviceinfo`/`idevicepair` and
/// the WebDriverAgent HTTP endpoint.
pub struct XcTestConnection {
    idevice_id: Arc<dyn CommandRunner>,
    ideviceinfo: Arc<dyn CommandRunner>,
    idevicepair: Arc<dyn CommandRunner>,
    http: reqwest::Client,
    wda_url: String,
    timeout: Duration,
}

impl Default for XcTestConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl XcTestConnection {
    pub fn new() -> Self {
        Self {
            idevice_id: ToolRunner::shared("idevice_id"),
            ideviceinfo: ToolRunner::shared("ideviceinfo"),
            idevicepair: ToolRunner::shared("idevicepair"),
            http: reqwest::Client::new(),
            wda_url: DEFAULT_WDA_URL.to_string(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Route every libimobiledevice tool through one runner.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.idevice_id = runner.clone();
        self.ideviceinfo = runner.clone();
        self.idevicepair = runner;
        self
    }

    pub fn with_wda_url(mut self, url: impl Into<String>) -> Self {
        self.wda_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn wda_url(&self) -> &str {
        &self.wda_url
    }

    async fn run(&self, runner: &Arc<dyn CommandRunner>, args: &[&str]) -> Result<crate::device::ShellOutput, ConnectionError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Ok(runner.run(&args, self.timeout).await?)
    }

    /// `ideviceinfo -u <udid>` as `(model, ios_version)`.
    async fn details(&self, udid: &str) -> (Option<String>, Option<String>) {
        match self.run(&self.ideviceinfo, &["-u", udid]).await {
            Ok(output) if output.success() => parse_device_info(&output.stdout_text()),
            _ => (None, None),
        }
    }

    /// Raw `/status` document of the WebDriverAgent at `url`.
    pub async fn status(&self, url: &str) -> Result<Value, ConnectionError> {
        let response = self
            .http
            .get(format!("{}/status", url.trim_end_matches('/')))
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ConnectionError::Http(format!(
                "WebDriverAgent /status returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    pub async fn is_wda_ready(&self, url: &str) -> bool {
        self.status(url).await.is_ok()
    }

    /// Create a WebDriverAgent session and return its id.
    pub async fn start_session(&self, url: &str) -> Result<String, ConnectionError> {
        let response = self
            .http
            .post(format!("{}/session", url.trim_end_matches('/')))
            .json(&json!({ "capabilities": {} }))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ConnectionError::Http(format!("Failed to start session: {}", body)));
        }

        let data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        session_id_of(&data).ok_or_else(|| ConnectionError::Http(format!("No sessionId in response: {}", body)))
    }

    /// Trust the host on the device (`idevicepair pair`).
    pub async fn pair(&self, device_id: Option<&str>) -> Result<String, ConnectionError> {
        let output = match device_id {
            Some(udid) => self.run(&self.idevicepair, &["-u", udid, "pair"]).await?,
            None => self.run(&self.idevicepair, &["pair"]).await?,
        };

        let combined = output.combined();
        if combined.contains("SUCCESS") || combined.to_lowercase().contains("already paired") {
            Ok("Device paired successfully".to_string())
        } else {
            Err(ConnectionError::CommandFailed(combined.trim().to_string()))
        }
    }
}

#[async_trait]
impl ConnectionManager for XcTestConnection {
    async fn list(&self) -> Result<Vec<DeviceInfo>, ConnectionError> {
        let output = self.run(&self.idevice_id, &["-ln"]).await?;
        let mut devices = Vec::new();

        for udid in output.stdout_text().lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (model, os_version) = self.details(udid).await;
            devices.push(DeviceInfo {
                device_id: udid.to_string(),
                status: "connected".to_string(),
                connection_kind: connection_kind_of(udid),
                model,
                os_version,
            });
        }

        Ok(devices)
    }

    /// Probe the WebDriverAgent listening at `address`.
    async fn connect(&self, address: &str) -> Result<String, ConnectionError> {
        let url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        self.status(&url).await?;
        Ok(format!("WebDriverAgent ready at {}", url))
    }

    async fn disconnect(&self, _address: Option<&str>) -> Result<String, ConnectionError> {
        Ok("Nothing to disconnect: WebDriverAgent is stateless over HTTP".to_string())
    }

    async fn enable_remote_bridge(&self, _port: u16, _device_id: Option<&str>) -> Result<String, ConnectionError> {
        Err(ConnectionError::Unsupported(
            "iOS has no remote bridge; forward the WebDriverAgent port (e.g. iproxy 8100 8100) instead",
        ))
    }

    async fn device_ip(&self, _device_id: Option<&str>) -> Option<String> {
        None
    }

    async fn check_tooling(&self) -> Result<String, ConnectionError> {
        let output = self.run(&self.idevice_id, &["--version"]).await?;
        let version = output.combined().trim().to_string();
        if output.success() {
            Ok(if version.is_empty() { "idevice_id".to_string() } else { version })
        } else {
            Err(ConnectionError::CommandFailed(version))
        }
    }
}

/// Network-paired devices report long, dashed UDIDs.
fn connection_kind_of(udid: &str) -> ConnectionKind {
    if udid.contains('-') && udid.len() > 40 {
        ConnectionKind::Wifi
    } else {
        ConnectionKind::Usb
    }
}

fn parse_device_info(stdout: &str) -> (Option<String>, Option<String>) {
    let mut model = None;
    let mut version = None;
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "ProductType" => model = Some(value.trim().to_string()),
            "ProductVersion" => version = Some(value.trim().to_string()),
            _ => {}
        }
    }
    (model, version)
}

fn session_id_of(data: &Value) -> Option<String> {
    data.get("sessionId")
        .or_else(|| data.get("value").and_then(|v| v.get("sessionId")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
