//! Transport connection contract shared by the three backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::shell::ShellError;

/// How a device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Usb,
    Wifi,
    Remote,
}

/// A device as reported by the transport tool. Never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: String,
    pub connection_kind: ConnectionKind,
    pub model: Option<String>,
    pub os_version: Option<String>,
}

/// Connection-management failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("{tool} is not installed or not in PATH")]
    ToolMissing { tool: String },
    #[error("Connection timeout after {0}s")]
    Timeout(u64),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("HTTP error: {0}")]
    Http(String),
}

impl ConnectionError {
    /// Installation hint printed by the CLI when tooling is missing.
    pub fn remediation(&self) -> Option<&'static str> {
        let ConnectionError::ToolMissing { tool } = self else {
            return None;
        };
        Some(match tool.as_str() {
            "adb" => {
                "Install Android platform-tools:\n  \
                 macOS:   brew install android-platform-tools\n  \
                 Linux:   sudo apt install android-tools-adb\n  \
                 Windows: https://developer.android.com/studio/releases/platform-tools"
            }
            "hdc" => {
                "Install the HarmonyOS SDK toolchains and add the directory containing hdc to PATH:\n  \
                 https://developer.huawei.com/consumer/cn/download/"
            }
            _ => {
                "Install libimobiledevice:\n  \
                 macOS: brew install libimobiledevice\n  \
                 Linux: sudo apt-get install libimobiledevice-utils"
            }
        })
    }
}

impl From<ShellError> for ConnectionError {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::ToolMissing(tool) => ConnectionError::ToolMissing { tool },
            ShellError::Timeout(d) => ConnectionError::Timeout(d.as_secs()),
            ShellError::Spawn { reason, .. } => ConnectionError::CommandFailed(reason),
        }
    }
}

impl From<reqwest::Error> for ConnectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectionError::Timeout(0)
        } else {
            ConnectionError::Http(err.to_string())
        }
    }
}

/// Discovery, pairing and remote bridging for one transport.
///
/// Successful operations return the human-readable message the tool
/// produced, failures carry it inside the error.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn list(&self) -> Result<Vec<DeviceInfo>, ConnectionError>;

    async fn connect(&self, address: &str) -> Result<String, ConnectionError>;

    /// Disconnect one address, or every remote device when `None`.
    async fn disconnect(&self, address: Option<&str>) -> Result<String, ConnectionError>;

    /// Switch a USB device to network mode on `port`.
    async fn enable_remote_bridge(&self, port: u16, device_id: Option<&str>) -> Result<String, ConnectionError>;

    /// Best-effort address discovery. Loopback is never returned.
    async fn device_ip(&self, device_id: Option<&str>) -> Option<String>;

    /// Version line of the backend tool, or `ToolMissing`.
    async fn check_tooling(&self) -> Result<String, ConnectionError>;
}

/// Append `:5555` when the address has no port.
pub(crate) fn with_default_port(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:5555", address)
    }
}

pub(crate) const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull the first `inet` address out of `ifconfig`-style output.
pub(crate) fn parse_inet(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let rest = line.strip_prefix("inet ")?;
        let addr = rest
            .split_whitespace()
            .next()?
            .trim_start_matches("addr:");
        let addr = addr.split('/').next()?;
        (!addr.starts_with("127.") && !addr.is_empty()).then(|| addr.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("192.168.1.5"), "192.168.1.5:5555");
        assert_eq!(with_default_port("192.168.1.5:7000"), "192.168.1.5:7000");
    }

    #[test]
    fn test_parse_inet_skips_loopback() {
        let out = "lo: flags=73<UP,LOOPBACK>\n    inet 127.0.0.1  netmask 255.0.0.0\n\
                   wlan0: flags=4163<UP>\n    inet 192.168.1.23  netmask 255.255.255.0\n";
        assert_eq!(parse_inet(out), Some("192.168.1.23".to_string()));
        assert_eq!(parse_inet("inet addr:10.0.0.7  Bcast:10.0.0.255"), Some("10.0.0.7".to_string()));
        assert_eq!(parse_inet("inet 127.0.0.1"), None);
    }

    #[test]
    fn test_remediation_only_for_missing_tool() {
        let missing = ConnectionError::ToolMissing { tool: "adb".into() };
        assert!(missing.remediation().unwrap().contains("platform-tools"));
        assert!(ConnectionError::Timeout(5).remediation().is_none());
    }

    #[test]
    fn test_shell_error_conversion() {
        let err: ConnectionError = ShellError::Timeout(Duration::from_secs(10)).into();
        assert_eq!(err, ConnectionError::Timeout(10));
        let err: ConnectionError = ShellError::ToolMissing("hdc".into()).into();
        assert_eq!(err, ConnectionError::ToolMissing { tool: "hdc".into() });
    }
}
