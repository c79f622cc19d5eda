//! ADB connection management for local and remote devices.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::device::connection::{parse_inet, with_default_port, DEFAULT_TOOL_TIMEOUT};
use crate::device::{CommandRunner, ConnectionError, ConnectionKind, ConnectionManager, DeviceInfo, ToolRunner};

/// Manages ADB connections to Android devices.
///
/// Supports USB, WiFi, and remote TCP/IP connections.
///
/// # Example
/// ```rust,no_run
/// use mobile_agent::adb::AdbConnection;
/// use mobile_agent::device::ConnectionManager;
///
/// # async fn demo() -> Result<(), mobile_agent::device::ConnectionError> {
/// let conn = AdbConnection::new();
/// conn.connect("192.168.1.100:5555").await?;
/// let devices = conn.list().await?;
/// # Ok(())
/// # }
/// ```
pub struct AdbConnection {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Default for AdbConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbConnection {
    /// Create a connection manager using `adb` from `PATH`.
    pub fn new() -> Self {
        Self::with_runner(ToolRunner::shared("adb"))
    }

    /// Create a connection manager with a custom ADB path.
    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self::with_runner(ToolRunner::shared(adb_path))
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

    async fn adb(&self, args: &[&str]) -> Result<crate::device::ShellOutput, ConnectionError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Ok(self.runner.run(&args, self.timeout).await?)
    }

    async fn os_version(&self, device_id: &str) -> Option<String> {
        let output = self
            .adb(&["-s", device_id, "shell", "getprop", "ro.build.version.release"])
            .await
            .ok()?;
        let version = output.stdout_text().trim().to_string();
        (output.success() && !version.is_empty()).then_some(version)
    }

    /// Restart the ADB server.
    pub async fn restart_server(&self) -> Result<String, ConnectionError> {
        self.adb(&["kill-server"]).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.adb(&["start-server"]).await?;
        Ok("ADB server restarted".to_string())
    }
}

#[async_trait]
impl ConnectionManager for AdbConnection {
    async fn list(&self) -> Result<Vec<DeviceInfo>, ConnectionError> {
        let output = self.adb(&["devices", "-l"]).await?;
        let mut devices = parse_devices(&output.stdout_text());

        for device in devices.iter_mut().filter(|d| d.status == "device") {
            device.os_version = self.os_version(&device.device_id).await;
        }

        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<String, ConnectionError> {
        let address = with_default_port(address);
        let output = self.adb(&["connect", &address]).await?;
        let combined = output.combined().to_lowercase();

        if combined.contains("already connected") {
            Ok(format!("Already connected to {}", address))
        } else if combined.contains("connected") && !combined.contains("failed") {
            Ok(format!("Connected to {}", address))
        } else {
            Err(ConnectionError::Connection(output.combined().trim().to_string()))
        }
    }

    async fn disconnect(&self, address: Option<&str>) -> Result<String, ConnectionError> {
        let output = match address {
            Some(addr) => self.adb(&["disconnect", addr]).await?,
            None => self.adb(&["disconnect"]).await?,
        };

        if output.success() {
            Ok(output.combined().trim().to_string())
        } else {
            Err(ConnectionError::CommandFailed(output.combined().trim().to_string()))
        }
    }

    async fn enable_remote_bridge(&self, port: u16, device_id: Option<&str>) -> Result<String, ConnectionError> {
        let port = port.to_string();
        let output = match device_id {
            Some(id) => self.adb(&["-s", id, "tcpip", &port]).await?,
            None => self.adb(&["tcpip", &port]).await?,
        };

        let combined = output.combined();
        if combined.to_lowercase().contains("restarting") || output.success() {
            Ok(format!("TCP/IP mode enabled on port {}", port))
        } else {
            Err(ConnectionError::CommandFailed(combined.trim().to_string()))
        }
    }

    async fn device_ip(&self, device_id: Option<&str>) -> Option<String> {
        let mut prefix: Vec<&str> = Vec::new();
        if let Some(id) = device_id {
            prefix.extend(["-s", id]);
        }

        let route = [prefix.as_slice(), &["shell", "ip", "route"]].concat();
        if let Ok(output) = self.adb(&route).await {
            if let Some(ip) = parse_route_src(&output.stdout_text()) {
                return Some(ip);
            }
        }

        let ifconfig = [prefix.as_slice(), &["shell", "ifconfig", "wlan0"]].concat();
        let output = self.adb(&ifconfig).await.ok()?;
        parse_inet(&output.stdout_text())
    }

    async fn check_tooling(&self) -> Result<String, ConnectionError> {
        let output = self.adb(&["version"]).await?;
        let first = output.stdout_text().lines().next().unwrap_or_default().trim().to_string();
        if output.success() && !first.is_empty() {
            Ok(first)
        } else {
            Err(ConnectionError::CommandFailed(output.combined().trim().to_string()))
        }
    }
}

/// Parse `adb devices -l`.
fn parse_devices(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }

            let device_id = parts[0].to_string();
            let connection_kind = if device_id.contains(':') {
                ConnectionKind::Remote
            } else if device_id.contains("._adb-tls-connect.") {
                ConnectionKind::Wifi
            } else {
                ConnectionKind::Usb
            };

            let model = parts
                .iter()
                .find_map(|p| p.strip_prefix("model:"))
                .map(str::to_string);

            Some(DeviceInfo {
                device_id,
                status: parts[1].to_string(),
                connection_kind,
                model,
                os_version: None,
            })
        })
        .collect()
}

/// `… src 192.168.1.23 …` from `ip route`.
fn parse_route_src(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word == "src" {
                let ip = words.next()?;
                if !ip.starts_with("127.") {
                    return Some(ip.to_string());
                }
            }
        }
        None
    })
}

/// ADB arguments selecting a device.
pub(crate) fn adb_prefix(device_id: Option<&str>) -> Vec<String> {
    match device_id {
        Some(id) => vec!["-s".to_string(), id.to_string()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ShellError, ShellOutput};
    use crate::testing::ScriptedRunner;

    fn scripted() -> (Arc<ScriptedRunner>, AdbConnection) {
        let runner = Arc::new(ScriptedRunner::new("adb"));
        let conn = AdbConnection::with_runner(runner.clone());
        (runner, conn)
    }

    #[test]
    fn test_adb_prefix() {
        assert!(adb_prefix(None).is_empty());
        assert_eq!(adb_prefix(Some("device123")), vec!["-s", "device123"]);
    }

    #[test]
    fn test_parse_devices() {
        let out = "List of devices attached\n\
                   emulator-5554          device product:sdk model:Pixel_7 transport_id:1\n\
                   192.168.1.5:5555       offline\n\
                   adb-R58M._adb-tls-connect._tcp device model:SM_G991B\n\n";
        let devices = parse_devices(out);

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].model.as_deref(), Some("Pixel_7"));
        assert_eq!(devices[0].connection_kind, ConnectionKind::Usb);
        assert_eq!(devices[1].connection_kind, ConnectionKind::Remote);
        assert_eq!(devices[1].status, "offline");
        assert_eq!(devices[2].connection_kind, ConnectionKind::Wifi);
    }

    #[tokio::test]
    async fn test_list_fills_os_version_for_online_devices() {
        let (runner, conn) = scripted();
        runner.push_stdout("List of devices attached\nemulator-5554 device model:Pixel\n10.0.0.2:5555 offline\n");
        runner.push_stdout("14\n");

        let devices = conn.list().await.unwrap();

        assert_eq!(devices[0].os_version.as_deref(), Some("14"));
        assert_eq!(devices[1].os_version, None);
        assert_eq!(
            runner.calls(),
            vec![
                "devices -l",
                "-s emulator-5554 shell getprop ro.build.version.release"
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_adds_default_port() {
        let (runner, conn) = scripted();
        runner.push_stdout("connected to 192.168.1.100:5555\n");

        let msg = conn.connect("192.168.1.100").await.unwrap();

        assert_eq!(msg, "Connected to 192.168.1.100:5555");
        assert_eq!(runner.calls(), vec!["connect 192.168.1.100:5555"]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (runner, conn) = scripted();
        runner.push_stdout("failed to connect to '10.0.0.9:5555': Connection refused\n");

        let err = conn.connect("10.0.0.9:5555").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Connection(_)));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_connection_timeout() {
        let (runner, conn) = scripted();
        runner.push_err(ShellError::Timeout(Duration::from_secs(10)));

        assert_eq!(conn.connect("10.0.0.9").await.unwrap_err(), ConnectionError::Timeout(10));
    }

    #[tokio::test]
    async fn test_check_tooling() {
        let (runner, conn) = scripted();
        runner.push_stdout("Android Debug Bridge version 1.0.41\nVersion 34.0.5\n");
        assert_eq!(conn.check_tooling().await.unwrap(), "Android Debug Bridge version 1.0.41");

        runner.push_err(ShellError::ToolMissing("adb".into()));
        let err = conn.check_tooling().await.unwrap_err();
        assert!(err.remediation().is_some());
    }

    #[tokio::test]
    async fn test_device_ip_prefers_route() {
        let (runner, conn) = scripted();
        runner.push_stdout("192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.42\n");
        assert_eq!(conn.device_ip(Some("abc")).await.as_deref(), Some("192.168.1.42"));

        runner.push(ShellOutput::failed(1, ""));
        runner.push_stdout("wlan0: flags=4163\n    inet 10.1.1.8  netmask 255.255.255.0\n");
        assert_eq!(conn.device_ip(None).await.as_deref(), Some("10.1.1.8"));
    }

    #[tokio::test]
    async fn test_enable_remote_bridge() {
        let (runner, conn) = scripted();
        runner.push_stdout("restarting in TCP mode port: 5555\n");

        let msg = conn.enable_remote_bridge(5555, Some("emulator-5554")).await.unwrap();
        assert_eq!(msg, "TCP/IP mode enabled on port 5555");
        assert_eq!(runner.calls(), vec!["-s emulator-5554 tcpip 5555"]);
    }
}
