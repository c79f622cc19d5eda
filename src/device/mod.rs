//! Backend-neutral device layer.
//!
//! Gestures arrive as normalized [`Point`]s and go out through one
//! [`Capability`] trait object chosen when the [`DeviceSession`] is opened.

pub mod connection;
pub mod shell;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::adb::AdbDriver;
use crate::config::apps::{AppRegistry, StaticRegistry};
use crate::hdc::HdcDriver;
use crate::screenshot::{CapturePolicy, Screenshot};
use crate::xctest::{XcTestConnection, XcTestDriver};

pub use connection::{ConnectionError, ConnectionKind, ConnectionManager, DeviceInfo};
pub use shell::{CommandRunner, ShellArtifacts, ShellError, ShellOutput, ShellTarget, ToolRunner};

/// Largest coordinate on the normalized 0-999 grid.
pub const NORMALIZED_MAX: i64 = 999;

/// Automation transport family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Android through the ADB shell.
    Adb,
    /// HarmonyOS through the HDC shell.
    Hdc,
    /// iOS through WebDriverAgent.
    XcTest,
}

impl Platform {
    /// Executable the connection manager shells out to.
    pub fn tool(&self) -> &'static str {
        match self {
            Platform::Adb => "adb",
            Platform::Hdc => "hdc",
            Platform::XcTest => "idevice_id",
        }
    }

    /// Resolution used for fallback frames and before the first capture.
    pub fn default_resolution(&self) -> (u32, u32) {
        match self {
            Platform::Adb | Platform::Hdc => (1080, 2400),
            Platform::XcTest => (1179, 2556),
        }
    }

    /// On-device scratch file written by screen capture, if any.
    pub fn scratch_path(&self) -> Option<&'static str> {
        match self {
            Platform::Adb => Some("/sdcard/tmp.png"),
            Platform::Hdc => Some("/data/local/tmp/tmp_screenshot.jpeg"),
            Platform::XcTest => None,
        }
    }

    pub fn swipe_timing(&self) -> SwipeTiming {
        match self {
            Platform::Adb => SwipeTiming::new(1000, 2000),
            Platform::Hdc => SwipeTiming::new(500, 1000),
            Platform::XcTest => SwipeTiming::new(300, 2000),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Adb => "adb",
            Platform::Hdc => "hdc",
            Platform::XcTest => "ios",
        };
        f.write_str(name)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adb" | "android" => Ok(Platform::Adb),
            "hdc" | "harmony" | "harmonyos" => Ok(Platform::Hdc),
            "ios" | "xctest" | "wda" => Ok(Platform::XcTest),
            other => Err(format!("Unknown device type: {} (expected adb, hdc or ios)", other)),
        }
    }
}

/// Position on the normalized 0-999 grid, independent of screen size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn is_normalized(&self) -> bool {
        (0..=NORMALIZED_MAX).contains(&self.x) && (0..=NORMALIZED_MAX).contains(&self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Pixel dimensions of the screen a driver is projecting onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Map a normalized point onto pixels (`coord / 1000 × size`, truncated).
    pub fn project(&self, point: Point) -> (i32, i32) {
        let x = (point.x as f64 / 1000.0 * self.width as f64) as i32;
        let y = (point.y as f64 / 1000.0 * self.height as f64) as i32;
        (x, y)
    }
}

/// Viewport shared between a driver's capture path and its gesture path.
#[derive(Debug)]
pub(crate) struct ViewportCell {
    width: AtomicU32,
    height: AtomicU32,
}

impl ViewportCell {
    pub fn new((width, height): (u32, u32)) -> Self {
        Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        }
    }

    pub fn get(&self) -> Viewport {
        Viewport::new(
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }

    /// Adopt the size of a real capture. Fallback frames are ignored.
    pub fn observe(&self, shot: &Screenshot) {
        if shot.fallback.is_none() && shot.width > 0 && shot.height > 0 {
            self.width.store(shot.width, Ordering::Relaxed);
            self.height.store(shot.height, Ordering::Relaxed);
        }
    }
}

/// Squared-distance swipe heuristic with backend-specific clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeTiming {
    pub floor_ms: u64,
    pub ceil_ms: u64,
}

impl SwipeTiming {
    pub const fn new(floor_ms: u64, ceil_ms: u64) -> Self {
        Self { floor_ms, ceil_ms }
    }

    /// `dist² / 1000` milliseconds, clamped.
    pub fn duration(&self, from: (i32, i32), to: (i32, i32)) -> Duration {
        let dx = (from.0 - to.0) as i64;
        let dy = (from.1 - to.1) as i64;
        let dist_sq = (dx * dx + dy * dy) as u64;
        Duration::from_millis((dist_sq / 1000).clamp(self.floor_ms, self.ceil_ms))
    }
}

/// Post-gesture settle delays so the next capture sees a settled UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub tap: Duration,
    pub double_tap: Duration,
    pub double_tap_gap: Duration,
    pub long_press: Duration,
    pub long_press_hold: Duration,
    pub swipe: Duration,
    pub back: Duration,
    pub home: Duration,
    pub launch: Duration,
    pub text: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        let settle = Duration::from_secs(1);
        Self {
            tap: settle,
            double_tap: settle,
            double_tap_gap: Duration::from_millis(100),
            long_press: settle,
            long_press_hold: Duration::from_millis(3000),
            swipe: settle,
            back: settle,
            home: settle,
            launch: settle,
            text: settle,
        }
    }
}

impl SettleDelays {
    /// No settling at all. Gesture hold times keep their defaults.
    pub fn none() -> Self {
        Self {
            tap: Duration::ZERO,
            double_tap: Duration::ZERO,
            double_tap_gap: Duration::ZERO,
            long_press: Duration::ZERO,
            swipe: Duration::ZERO,
            back: Duration::ZERO,
            home: Duration::ZERO,
            launch: Duration::ZERO,
            text: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub(crate) async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Faults raised while executing a gesture.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("WebDriverAgent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebDriverAgent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Transient on-device file that can be probed and removed.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, path: &str, timeout: Duration) -> Result<bool, ShellError>;

    async fn remove(&self, path: &str, timeout: Duration) -> Result<(), ShellError>;

    /// Raw `stat -c %Y` output, `None` when the file is missing.
    async fn modified_at(&self, path: &str, timeout: Duration) -> Result<Option<String>, ShellError>;

    /// Raw `ls -la` line, `None` when the file is missing.
    async fn describe(&self, path: &str, timeout: Duration) -> Result<Option<String>, ShellError>;
}

/// Gesture and observation surface every backend implements.
#[async_trait]
pub trait Capability: Send + Sync {
    fn platform(&self) -> Platform;

    async fn tap(&self, at: Point) -> Result<(), DeviceError>;

    async fn double_tap(&self, at: Point) -> Result<(), DeviceError>;

    async fn long_press(&self, at: Point) -> Result<(), DeviceError>;

    /// Swipe between two points. `None` derives the duration from distance.
    async fn swipe(&self, from: Point, to: Point, duration: Option<Duration>) -> Result<(), DeviceError>;

    async fn back(&self) -> Result<(), DeviceError>;

    async fn home(&self) -> Result<(), DeviceError>;

    /// Launch an app by display name. `Ok(false)` when the name is unknown.
    async fn launch(&self, app_name: &str) -> Result<bool, DeviceError>;

    async fn type_text(&self, text: &str) -> Result<(), DeviceError>;

    async fn clear_text(&self) -> Result<(), DeviceError>;

    /// Always yields a frame; see [`crate::screenshot::acquire`].
    async fn screenshot(&self) -> Screenshot;

    /// Display name of the foreground app, `"System Home"` when unknown.
    async fn current_app(&self) -> String;

    /// Scratch file left behind by capture, if this backend has one.
    fn scratch_artifact(&self) -> Option<&dyn ArtifactStore> {
        None
    }
}

/// Options used to open a [`DeviceSession`].
#[derive(Clone)]
pub struct SessionOptions {
    pub device_id: Option<String>,
    pub delays: SettleDelays,
    pub capture: CapturePolicy,
    /// Timeout for a single tool invocation or HTTP request.
    pub command_timeout: Duration,
    pub wda_url: String,
    pub wda_session_id: Option<String>,
    /// Overrides the built-in app table for the platform.
    pub registry: Option<Arc<dyn AppRegistry>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_id: None,
            delays: SettleDelays::default(),
            capture: CapturePolicy::default(),
            command_timeout: Duration::from_secs(10),
            wda_url: "http://localhost:8100".to_string(),
            wda_session_id: None,
            registry: None,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("device_id", &self.device_id)
            .field("delays", &self.delays)
            .field("capture", &self.capture)
            .field("command_timeout", &self.command_timeout)
            .field("wda_url", &self.wda_url)
            .field("wda_session_id", &self.wda_session_id)
            .field("registry", &self.registry.is_some())
            .finish()
    }
}

impl SessionOptions {
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_wda_url(mut self, url: impl Into<String>) -> Self {
        self.wda_url = url.into();
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn AppRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub(crate) fn registry_for(&self, platform: Platform) -> Arc<dyn AppRegistry> {
        self.registry
            .clone()
            .unwrap_or_else(|| Arc::new(StaticRegistry::for_platform(platform)))
    }
}

/// An established connection to one device, owning its backend driver.
pub struct DeviceSession {
    platform: Platform,
    device_id: Option<String>,
    driver: Box<dyn Capability>,
}

impl DeviceSession {
    /// Pick the backend for `platform` and bind it to the configured device.
    ///
    /// For iOS a WebDriverAgent session is created unless one was supplied.
    /// A WDA that cannot be reached is logged and the session is still
    /// returned, since gestures that need no session keep working.
    pub async fn open(platform: Platform, options: SessionOptions) -> Result<Self, ConnectionError> {
        let driver: Box<dyn Capability> = match platform {
            Platform::Adb => Box::new(AdbDriver::new(ToolRunner::shared("adb"), &options)),
            Platform::Hdc => Box::new(HdcDriver::new(ToolRunner::shared("hdc"), &options)),
            Platform::XcTest => {
                let mut options = options.clone();
                if options.wda_session_id.is_none() {
                    let conn = XcTestConnection::new().with_timeout(options.command_timeout);
                    match conn.start_session(&options.wda_url).await {
                        Ok(id) => options.wda_session_id = Some(id),
                        Err(e) => tracing::warn!("Could not start WebDriverAgent session: {}", e),
                    }
                }
                Box::new(XcTestDriver::new(&options)?)
            }
        };

        tracing::info!(
            "Opened {} session for device {}",
            platform,
            options.device_id.as_deref().unwrap_or("<default>")
        );

        Ok(Self {
            platform,
            device_id: options.device_id,
            driver,
        })
    }

    /// Wrap an already-built driver.
    pub fn with_driver(driver: Box<dyn Capability>, device_id: Option<String>) -> Self {
        Self {
            platform: driver.platform(),
            device_id,
            driver,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn driver(&self) -> &dyn Capability {
        self.driver.as_ref()
    }
}
