//! Removal of the transient on-device capture file.
//!
//! Cleanup failures are reported in the returned [`CleanupResult`] and the
//! manager's history; they never propagate to the task that owns the device.

use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::time::Duration;

use crate::device::{ArtifactStore, Platform, ShellError};
use crate::retry::{self, Backoff, Verdict};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(24 * 3600);

/// Classified cause of a failed cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupErrorKind {
    Timeout,
    PersistentFile,
    ParseError,
    /// Any other tool fault, tagged with its kind.
    Exception(String),
}

impl fmt::Display for CleanupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupErrorKind::Timeout => f.write_str("cleanup_timeout"),
            CleanupErrorKind::PersistentFile => f.write_str("cleanup_failed_file_persists"),
            CleanupErrorKind::ParseError => f.write_str("parse_error"),
            CleanupErrorKind::Exception(kind) => f.write_str(kind),
        }
    }
}

impl From<&ShellError> for CleanupErrorKind {
    fn from(err: &ShellError) -> Self {
        match err {
            ShellError::Timeout(_) => CleanupErrorKind::Timeout,
            other => CleanupErrorKind::Exception(other.kind().to_string()),
        }
    }
}

/// Outcome of one cleanup attempt or operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupResult {
    pub success: bool,
    pub message: String,
    pub attempt: u32,
    pub total_attempts: u32,
    pub error: Option<CleanupErrorKind>,
}

impl CleanupResult {
    fn ok(message: impl Into<String>, attempt: u32, total_attempts: u32) -> Self {
        Self {
            success: true,
            message: message.into(),
            attempt,
            total_attempts,
            error: None,
        }
    }

    fn failed(message: impl Into<String>, attempt: u32, total_attempts: u32, error: CleanupErrorKind) -> Self {
        Self {
            success: false,
            message: message.into(),
            attempt,
            total_attempts,
            error: Some(error),
        }
    }
}

/// A history entry.
#[derive(Debug, Clone)]
pub struct CleanupRecord {
    pub timestamp: DateTime<Local>,
    pub device_id: Option<String>,
    pub result: CleanupResult,
    /// Delay earned by this attempt's failure.
    pub backoff: Option<Duration>,
}

/// What `ls -la` says about the scratch file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub exists: bool,
    pub path: String,
    pub size: u64,
    pub raw_output: Option<String>,
    pub error: Option<String>,
}

impl ArtifactInfo {
    pub fn size_mb(&self) -> f64 {
        (self.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Tiered, verified removal of the capture scratch file.
#[derive(Debug, Clone)]
pub struct CleanupManager {
    path: String,
    device_id: Option<String>,
    timeout: Duration,
    backoff: Backoff,
    history: Vec<CleanupRecord>,
}

impl CleanupManager {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_id: None,
            timeout: DEFAULT_TIMEOUT,
            backoff: Backoff::linear(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY),
            history: Vec::new(),
        }
    }

    /// Manager for the platform's scratch file, `None` if it leaves none behind.
    pub fn for_platform(platform: Platform) -> Option<Self> {
        platform.scratch_path().map(Self::new)
    }

    pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.backoff = Backoff::linear(max_retries, retry_delay);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn history(&self) -> &[CleanupRecord] {
        &self.history
    }

    /// Remove the scratch file, verifying after each removal.
    pub async fn cleanup(&mut self, store: &dyn ArtifactStore) -> CleanupResult {
        let total = self.backoff.max_attempts.max(1);
        let backoff = self.backoff;
        let path = self.path.as_str();
        let timeout = self.timeout;
        let device_id = self.device_id.clone();
        let history = &mut self.history;

        let outcome = retry::retry(
            backoff,
            |attempt| async move {
                let failed = |e: ShellError| {
                    let message = format!("Cleanup attempt {}/{}: {}", attempt, total, e);
                    CleanupResult::failed(message, attempt, total, CleanupErrorKind::from(&e))
                };

                if !store.exists(path, timeout).await.map_err(failed)? {
                    return Ok(CleanupResult::ok(
                        "Screenshot file does not exist (already cleaned or never created)",
                        attempt,
                        total,
                    ));
                }

                store.remove(path, timeout).await.map_err(failed)?;

                if store.exists(path, timeout).await.map_err(failed)? {
                    return Err(CleanupResult::failed(
                        format!("Cleanup attempt {}/{}: File still exists", attempt, total),
                        attempt,
                        total,
                        CleanupErrorKind::PersistentFile,
                    ));
                }

                Ok(CleanupResult::ok(
                    format!("Screenshot cleaned up successfully (attempt {}/{})", attempt, total),
                    attempt,
                    total,
                ))
            },
            |attempt, result: &CleanupResult| {
                tracing::debug!("{}", result.message);
                history.push(CleanupRecord {
                    timestamp: Local::now(),
                    device_id: device_id.clone(),
                    result: result.clone(),
                    backoff: Some(backoff.delay_for(attempt)),
                });
                Verdict::Retry
            },
        )
        .await;

        let (result, earned) = match outcome.result {
            Ok(result) => (result, None),
            Err(mut result) => {
                result.message = match &result.error {
                    Some(CleanupErrorKind::PersistentFile) => {
                        format!("File still exists after {} cleanup attempts", total)
                    }
                    Some(CleanupErrorKind::Timeout) => format!("Cleanup timed out after {} attempts", total),
                    _ => format!("Cleanup failed after {} attempts: {}", total, result.message),
                };
                (result, Some(backoff.delay_for(outcome.attempts)))
            }
        };

        self.record(result.clone(), earned);
        result
    }

    /// Clean only when the file's mtime is at least `max_age` old.
    pub async fn cleanup_stale(&mut self, store: &dyn ArtifactStore, max_age: Duration) -> CleanupResult {
        let raw = match store.modified_at(&self.path, self.timeout).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                let result = CleanupResult::ok("File does not exist or cannot stat", 1, 1);
                self.record(result.clone(), None);
                return result;
            }
            Err(e) => {
                let result = CleanupResult::failed(
                    format!("Failed to check file age: {}", e),
                    1,
                    1,
                    CleanupErrorKind::from(&e),
                );
                self.record(result.clone(), None);
                return result;
            }
        };

        let Ok(mtime) = raw.trim().parse::<i64>() else {
            let result = CleanupResult::failed(
                "Could not parse file modification time",
                1,
                1,
                CleanupErrorKind::ParseError,
            );
            self.record(result.clone(), None);
            return result;
        };

        let age_secs = Utc::now().timestamp() - mtime;
        let age_hours = age_secs as f64 / 3600.0;
        let threshold_hours = max_age.as_secs_f64() / 3600.0;

        if age_secs >= max_age.as_secs() as i64 {
            tracing::info!("Scratch file is {:.1} hours old, cleaning up", age_hours);
            return self.cleanup(store).await;
        }

        let result = CleanupResult::ok(
            format!(
                "File is only {:.1} hours old (threshold: {}h), skipping cleanup",
                age_hours, threshold_hours
            ),
            1,
            1,
        );
        self.record(result.clone(), None);
        result
    }

    /// Describe the scratch file. Tool faults are folded into `error`.
    pub async fn inspect(&self, store: &dyn ArtifactStore) -> ArtifactInfo {
        let mut info = ArtifactInfo {
            exists: false,
            path: self.path.clone(),
            size: 0,
            raw_output: None,
            error: None,
        };

        match store.describe(&self.path, self.timeout).await {
            Ok(Some(line)) => {
                // -rw-rw---- 1 root sdcard_rw 2097152 2024-12-20 10:30 /sdcard/tmp.png
                info.exists = true;
                info.size = line
                    .split_whitespace()
                    .nth(4)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                info.raw_output = Some(line);
            }
            Ok(None) => {}
            Err(e) => info.error = Some(e.to_string()),
        }

        info
    }

    fn record(&mut self, result: CleanupResult, backoff: Option<Duration>) {
        if result.success {
            tracing::info!("Cleanup ({}/{}): {}", result.attempt, result.total_attempts, result.message);
        } else {
            tracing::warn!("Cleanup ({}/{}): {}", result.attempt, result.total_attempts, result.message);
        }
        self.history.push(CleanupRecord {
            timestamp: Local::now(),
            device_id: self.device_id.clone(),
            result,
            backoff,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;

    fn manager() -> CleanupManager {
        CleanupManager::new("/sdcard/tmp.png")
            .with_device_id(Some("emulator-5554".into()))
            .with_retries(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_absent_file_succeeds_without_removal() {
        let store = FakeStore::absent();
        let mut mgr = manager();

        let result = mgr.cleanup(&store).await;

        assert!(result.success);
        assert_eq!(result.attempt, 1);
        assert_eq!(store.removals(), 0);
        assert_eq!(mgr.history().len(), 1);
    }

    #[tokio::test]
    async fn test_present_file_is_removed_and_verified() {
        let store = FakeStore::present();
        let mut mgr = manager();

        let result = mgr.cleanup(&store).await;

        assert!(result.success);
        assert_eq!(store.removals(), 1);
        assert!(!store.is_present());
        assert!(result.message.contains("attempt 1/3"));
    }

    #[tokio::test]
    async fn test_persistent_file_logs_every_attempt() {
        let store = FakeStore::stuck();
        let mut mgr = CleanupManager::new("/sdcard/tmp.png").with_retries(3, Duration::from_millis(1));

        let result = mgr.cleanup(&store).await;

        assert!(!result.success);
        assert_eq!(result.attempt, 3);
        assert_eq!(result.error, Some(CleanupErrorKind::PersistentFile));
        assert_eq!(result.message, "File still exists after 3 cleanup attempts");
        assert_eq!(store.removals(), 3);

        let backoffs: Vec<_> = mgr.history().iter().map(|r| r.backoff).collect();
        assert_eq!(
            backoffs,
            vec![
                Some(Duration::from_millis(1)),
                Some(Duration::from_millis(2)),
                Some(Duration::from_millis(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let store = FakeStore::failing(ShellError::Timeout(Duration::from_secs(5)));
        let mut mgr = manager();

        let result = mgr.cleanup(&store).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(CleanupErrorKind::Timeout));
        assert_eq!(mgr.history().len(), 3);
    }

    #[tokio::test]
    async fn test_other_fault_is_exception() {
        let store = FakeStore::failing(ShellError::ToolMissing("adb".into()));
        let mut mgr = manager();

        let result = mgr.cleanup(&store).await;

        assert_eq!(result.error, Some(CleanupErrorKind::Exception("ToolMissing".into())));
        assert_eq!(result.error.unwrap().to_string(), "ToolMissing");
    }

    #[tokio::test]
    async fn test_stale_skips_fresh_file() {
        let store = FakeStore::present().with_mtime(Utc::now().timestamp().to_string());
        let mut mgr = manager();

        let result = mgr.cleanup_stale(&store, DEFAULT_STALE_THRESHOLD).await;

        assert!(result.success);
        assert!(result.message.contains("skipping"));
        assert!(store.is_present());
    }

    #[tokio::test]
    async fn test_stale_cleans_old_file() {
        let old = Utc::now().timestamp() - 25 * 3600;
        let store = FakeStore::present().with_mtime(old.to_string());
        let mut mgr = manager();

        let result = mgr.cleanup_stale(&store, DEFAULT_STALE_THRESHOLD).await;

        assert!(result.success);
        assert!(!store.is_present());
    }

    #[tokio::test]
    async fn test_stale_unparseable_mtime() {
        let store = FakeStore::present().with_mtime("yesterday".into());
        let mut mgr = manager();

        let result = mgr.cleanup_stale(&store, DEFAULT_STALE_THRESHOLD).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(CleanupErrorKind::ParseError));
        assert!(store.is_present());
    }

    #[tokio::test]
    async fn test_inspect_parses_size() {
        let store = FakeStore::present()
            .with_listing("-rw-rw---- 1 root sdcard_rw 2097152 2024-12-20 10:30 /sdcard/tmp.png".into());
        let info = manager().inspect(&store).await;

        assert!(info.exists);
        assert_eq!(info.size, 2_097_152);
        assert_eq!(info.size_mb(), 2.0);

        let info = manager().inspect(&FakeStore::absent()).await;
        assert!(!info.exists);
        assert_eq!(info.path, "/sdcard/tmp.png");
    }

    #[test]
    fn test_platform_paths() {
        assert_eq!(CleanupManager::for_platform(Platform::Adb).unwrap().path(), "/sdcard/tmp.png");
        assert!(CleanupManager::for_platform(Platform::XcTest).is_none());
    }
}
