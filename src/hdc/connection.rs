//! HDC connection management for HarmonyOS devices.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::device::connection::{parse_inet, with_default_port, DEFAULT_TOOL_TIMEOUT};
use crate::device::{
    CommandRunner, ConnectionError, ConnectionKind, ConnectionManager, DeviceInfo, ShellOutput, ToolRunner,
};

/// Manages HDC connections to HarmonyOS devices.
pub struct HdcConnection {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Default for HdcConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl HdcConnection {
    pub fn new() -> Self {
        Self::with_runner(ToolRunner::shared("hdc"))
    }

    pub fn with_path(hdc_path: impl Into<String>) -> Self {
        Self::with_runner(ToolRunner::shared(hdc_path))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn hdc(&self, args: &[&str]) -> Result<ShellOutput, ConnectionError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Ok(self.runner.run(&args, self.timeout).await?)
    }

    /// Restart the HDC server. It also auto-starts on the next command.
    pub async fn restart_server(&self) -> Result<String, ConnectionError> {
        self.hdc(&["kill"]).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.hdc(&["start", "-r"]).await?;
        Ok("HDC server restarted".to_string())
    }
}

#[async_trait]
impl ConnectionManager for HdcConnection {
    async fn list(&self) -> Result<Vec<DeviceInfo>, ConnectionError> {
        let output = self.hdc(&["list", "targets"]).await?;
        Ok(parse_targets(&output.stdout_text()))
    }

    async fn connect(&self, address: &str) -> Result<String, ConnectionError> {
        let address = with_default_port(address);
        let output = self.hdc(&["tconn", &address]).await?;
        let combined = output.combined();
        let lower = combined.to_lowercase();

        if lower.contains("already connected") {
            Ok(format!("Already connected to {}", address))
        } else if combined.contains("Connect OK") || lower.contains("connected") {
            Ok(format!("Connected to {}", address))
        } else {
            Err(ConnectionError::Connection(combined.trim().to_string()))
        }
    }

    async fn disconnect(&self, address: Option<&str>) -> Result<String, ConnectionError> {
        match address {
            Some(addr) => {
                let output = self.hdc(&["tdisconn", addr]).await?;
                let text = output.combined().trim().to_string();
                Ok(if text.is_empty() { "Disconnected".to_string() } else { text })
            }
            None => {
                // No disconnect-all in hdc; drop each remote target.
                for device in self.list().await? {
                    if device.connection_kind == ConnectionKind::Remote {
                        self.hdc(&["tdisconn", &device.device_id]).await?;
                    }
                }
                Ok("Disconnected all remote devices".to_string())
            }
        }
    }

    async fn enable_remote_bridge(&self, port: u16, device_id: Option<&str>) -> Result<String, ConnectionError> {
        let port = port.to_string();
        let output = match device_id {
            Some(id) => self.hdc(&["-t", id, "tmode", "port", &port]).await?,
            None => self.hdc(&["tmode", "port", &port]).await?,
        };

        let combined = output.combined();
        if output.success() || combined.to_lowercase().contains("success") {
            Ok(format!("TCP/IP mode enabled on port {}", port))
        } else {
            Err(ConnectionError::CommandFailed(combined.trim().to_string()))
        }
    }

    async fn device_ip(&self, device_id: Option<&str>) -> Option<String> {
        let output = match device_id {
            Some(id) => self.hdc(&["-t", id, "shell", "ifconfig"]).await,
            None => self.hdc(&["shell", "ifconfig"]).await,
        }
        .ok()?;
        parse_inet(&output.stdout_text())
    }

    async fn check_tooling(&self) -> Result<String, ConnectionError> {
        let output = self.hdc(&["-v"]).await?;
        let version = output.combined().trim().to_string();
        if output.success() && !version.is_empty() {
            Ok(version)
        } else {
            Err(ConnectionError::CommandFailed(version))
        }
    }
}

/// Parse `hdc list targets`: one id per line, `[Empty]` when none.
fn parse_targets(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("[empty]"))
        .map(|line| {
            let device_id = line.split_whitespace().next().unwrap_or(line).to_string();
            let connection_kind = if device_id.contains(':') {
                ConnectionKind::Remote
            } else {
                ConnectionKind::Usb
            };
            DeviceInfo {
                device_id,
                status: "device".to_string(),
                connection_kind,
                model: None,
                os_version: None,
            }
        })
        .collect()
}

/// HDC arguments selecting a device.
pub(crate) fn hdc_prefix(device_id: Option<&str>) -> Vec<String> {
    match device_id {
        Some(id) => vec!["-t".to_string(), id.to_string()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn scripted() -> (Arc<ScriptedRunner>, HdcConnection) {
        let runner = Arc::new(ScriptedRunner::new("hdc"));
        (runner.clone(), HdcConnection::with_runner(runner))
    }

    #[test]
    fn test_parse_targets() {
        let devices = parse_targets("FMR0223C13000649\n192.168.1.100:5555\n\n");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].connection_kind, ConnectionKind::Usb);
        assert_eq!(devices[1].connection_kind, ConnectionKind::Remote);
        assert!(parse_targets("[Empty]\n").is_empty());
    }

    #[tokio::test]
    async fn test_connect_ok() {
        let (runner, conn) = scripted();
        runner.push_stdout("Connect OK\n");
        assert_eq!(conn.connect("192.168.1.100").await.unwrap(), "Connected to 192.168.1.100:5555");
        assert_eq!(runner.calls(), vec!["tconn 192.168.1.100:5555"]);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (runner, conn) = scripted();
        runner.push_stdout("[Fail]Connect failed\n");
        assert!(matches!(
            conn.connect("10.0.0.1:5555").await,
            Err(ConnectionError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_all_only_drops_remote() {
        let (runner, conn) = scripted();
        runner.push_stdout("FMR0223C13000649\n192.168.1.100:5555\n");

        let msg = conn.disconnect(None).await.unwrap();

        assert_eq!(msg, "Disconnected all remote devices");
        assert_eq!(runner.calls(), vec!["list targets", "tdisconn 192.168.1.100:5555"]);
    }

    #[tokio::test]
    async fn test_remote_bridge_and_ip() {
        let (runner, conn) = scripted();
        runner.push_stdout("Set device run mode successful.\n");
        conn.enable_remote_bridge(5555, Some("FMR0")).await.unwrap();

        runner.push_stdout("wlan0 Link encap:Ethernet\n  inet addr:192.168.3.7  Bcast:192.168.3.255\n");
        assert_eq!(conn.device_ip(Some("FMR0")).await.as_deref(), Some("192.168.3.7"));

        assert_eq!(
            runner.calls(),
            vec!["-t FMR0 tmode port 5555", "-t FMR0 shell ifconfig"]
        );
    }

    #[test]
    fn test_hdc_prefix() {
        assert_eq!(hdc_prefix(Some("abc")), vec!["-t", "abc"]);
        assert!(hdc_prefix(None).is_empty());
    }
}
