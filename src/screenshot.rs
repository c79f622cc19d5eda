//! Screen capture with retry, black-frame detection and a total fallback.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

use crate::device::Platform;
use crate::retry::{self, Backoff, Verdict};

/// Why a fallback frame was substituted for a real capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The capture tool reported a permission or error marker.
    PermissionDenied,
    /// Frames were captured but came back black.
    BlackFrames,
    /// Any other capture failure.
    CaptureFailed,
}

/// A captured (or substituted) screen frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    /// Base64 encoded PNG.
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
    pub is_sensitive: bool,
    pub fallback: Option<FallbackReason>,
}

impl Screenshot {
    /// A real capture.
    pub fn new(base64_data: String, width: u32, height: u32) -> Self {
        Self {
            base64_data,
            width,
            height,
            is_sensitive: false,
            fallback: None,
        }
    }

    /// Solid black frame of `size`. Only an explicit denial is sensitive.
    pub fn fallback((width, height): (u32, u32), reason: FallbackReason) -> Self {
        let black = RgbImage::from_pixel(width, height, image::Rgb([0, 0, 0]));
        let base64_data = encode_png(&DynamicImage::ImageRgb8(black))
            .map(|png| STANDARD.encode(png))
            .unwrap_or_default();

        Self {
            base64_data,
            width,
            height,
            is_sensitive: reason == FallbackReason::PermissionDenied,
            fallback: Some(reason),
        }
    }

    /// Whether the agent should try to escape the current screen first.
    pub fn needs_recovery(&self) -> bool {
        self.is_sensitive || self.fallback.is_some()
    }
}

/// Failure reported by a frame source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The tool's error channel carried a permission or sensitivity marker.
    #[error("Capture denied: {0}")]
    Denied(String),
    #[error("Capture failed: {0}")]
    Failed(String),
    #[error("Capture timed out")]
    Timeout,
}

impl CaptureError {
    /// Classify a failed capture command by its stderr.
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if stderr.contains("Permission denied") || lower.contains("error") || stderr.contains("Status: -1") {
            CaptureError::Denied(stderr.trim().to_string())
        } else {
            CaptureError::Failed(stderr.trim().to_string())
        }
    }
}

/// Produces encoded image bytes (PNG or JPEG) for one capture attempt.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn grab(&self, timeout: Duration) -> Result<Vec<u8>, CaptureError>;
}

/// Attempt budget and black-frame thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// A pixel is dark when every channel is below this.
    pub dark_threshold: u8,
    /// A frame is black when the dark share exceeds this.
    pub black_ratio: f64,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
            dark_threshold: 50,
            black_ratio: 0.95,
        }
    }
}

enum Miss {
    Capture(CaptureError),
    Black,
}

/// Capture a frame, retrying failures and black frames.
///
/// Never fails: once the attempts are spent a black fallback at the
/// platform's default resolution is returned, marked sensitive only when the
/// last failure was a denial.
pub async fn acquire(source: &dyn FrameSource, policy: &CapturePolicy, platform: Platform) -> Screenshot {
    let backoff = Backoff::fixed(policy.max_attempts, policy.retry_delay);

    let outcome = retry::retry(
        backoff,
        |attempt| async move {
            let bytes = source.grab(policy.timeout).await.map_err(Miss::Capture)?;
            let shot = validate(&bytes, policy).map_err(|miss| {
                if let Miss::Black = miss {
                    tracing::warn!(
                        "Detected black image on attempt {}/{}, retrying",
                        attempt,
                        policy.max_attempts
                    );
                }
                miss
            })?;
            Ok::<_, Miss>(shot)
        },
        |attempt, miss| {
            if let Miss::Capture(e) = miss {
                tracing::warn!("Screenshot attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
            }
            Verdict::Retry
        },
    )
    .await;

    let reason = match outcome.result {
        Ok(shot) => return shot,
        Err(Miss::Black) => FallbackReason::BlackFrames,
        Err(Miss::Capture(CaptureError::Denied(_))) => FallbackReason::PermissionDenied,
        Err(Miss::Capture(_)) => FallbackReason::CaptureFailed,
    };

    tracing::warn!(
        "All {} screenshot attempts exhausted, returning fallback ({:?})",
        outcome.attempts,
        reason
    );
    Screenshot::fallback(platform.default_resolution(), reason)
}

fn validate(bytes: &[u8], policy: &CapturePolicy) -> Result<Screenshot, Miss> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Miss::Capture(CaptureError::Failed(format!("undecodable frame: {}", e))))?;

    if is_black(&img, policy.dark_threshold, policy.black_ratio) {
        return Err(Miss::Black);
    }

    let png = match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => bytes.to_vec(),
        _ => encode_png(&img).map_err(|e| Miss::Capture(CaptureError::Failed(e.to_string())))?,
    };

    Ok(Screenshot::new(STANDARD.encode(png), img.width(), img.height()))
}

/// True when more than `ratio` of the pixels have every channel below `threshold`.
pub fn is_black(img: &DynamicImage, threshold: u8, ratio: f64) -> bool {
    let rgb = img.to_rgb8();
    let total = rgb.pixels().len();
    if total == 0 {
        return true;
    }
    let dark = rgb
        .pixels()
        .filter(|p| p.0.iter().all(|&c| c < threshold))
        .count();
    dark as f64 / total as f64 > ratio
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame_bytes, ScriptedFrames};

    fn fast_policy() -> CapturePolicy {
        CapturePolicy {
            retry_delay: Duration::ZERO,
            ..CapturePolicy::default()
        }
    }

    #[tokio::test]
    async fn test_first_good_frame_is_returned() {
        let frames = ScriptedFrames::new(vec![Ok(frame_bytes(40, 80, [200, 200, 200], ImageFormat::Png))]);
        let shot = acquire(&frames, &fast_policy(), Platform::Adb).await;

        assert_eq!((shot.width, shot.height), (40, 80));
        assert!(!shot.is_sensitive);
        assert_eq!(shot.fallback, None);
        assert_eq!(frames.grabs(), 1);
    }

    #[tokio::test]
    async fn test_black_then_good_retries() {
        let frames = ScriptedFrames::new(vec![
            Ok(frame_bytes(10, 10, [0, 0, 0], ImageFormat::Png)),
            Ok(frame_bytes(10, 10, [120, 30, 30], ImageFormat::Png)),
        ]);
        let shot = acquire(&frames, &fast_policy(), Platform::Adb).await;

        assert_eq!(shot.fallback, None);
        assert_eq!(frames.grabs(), 2);
    }

    #[tokio::test]
    async fn test_all_black_gives_non_sensitive_fallback() {
        let black = frame_bytes(10, 10, [10, 10, 10], ImageFormat::Png);
        let frames = ScriptedFrames::new(vec![Ok(black.clone()), Ok(black.clone()), Ok(black)]);
        let shot = acquire(&frames, &fast_policy(), Platform::Hdc).await;

        assert_eq!(shot.fallback, Some(FallbackReason::BlackFrames));
        assert!(!shot.is_sensitive);
        assert_eq!((shot.width, shot.height), (1080, 2400));
        assert_eq!(frames.grabs(), 3);
    }

    #[tokio::test]
    async fn test_denied_marks_sensitive() {
        let frames = ScriptedFrames::new(vec![
            Err(CaptureError::Failed("closed".into())),
            Err(CaptureError::Failed("closed".into())),
            Err(CaptureError::Denied("Permission denied".into())),
        ]);
        let shot = acquire(&frames, &fast_policy(), Platform::XcTest).await;

        assert!(shot.is_sensitive);
        assert_eq!(shot.fallback, Some(FallbackReason::PermissionDenied));
        assert_eq!((shot.width, shot.height), (1179, 2556));
    }

    #[tokio::test]
    async fn test_generic_failure_is_not_sensitive() {
        let frames = ScriptedFrames::new(vec![Err(CaptureError::Timeout)]);
        let shot = acquire(&frames, &fast_policy(), Platform::Adb).await;

        assert!(!shot.is_sensitive);
        assert_eq!(shot.fallback, Some(FallbackReason::CaptureFailed));
        assert!(shot.needs_recovery());
    }

    #[tokio::test]
    async fn test_jpeg_is_reencoded_as_png() {
        let frames = ScriptedFrames::new(vec![Ok(frame_bytes(16, 16, [250, 250, 250], ImageFormat::Jpeg))]);
        let shot = acquire(&frames, &fast_policy(), Platform::Hdc).await;

        let png = STANDARD.decode(&shot.base64_data).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_black_ratio_boundary() {
        // 96 of 100 pixels dark: black.
        let mut img = RgbImage::from_pixel(10, 10, image::Rgb([0, 0, 0]));
        for x in 0..4 {
            img.put_pixel(x, 0, image::Rgb([255, 255, 255]));
        }
        assert!(is_black(&DynamicImage::ImageRgb8(img.clone()), 50, 0.95));

        // exactly 95 dark: not black.
        img.put_pixel(4, 0, image::Rgb([255, 255, 255]));
        assert!(!is_black(&DynamicImage::ImageRgb8(img), 50, 0.95));
    }

    #[test]
    fn test_stderr_classification() {
        assert!(matches!(CaptureError::from_stderr("Permission denied"), CaptureError::Denied(_)));
        assert!(matches!(CaptureError::from_stderr("ERROR: secure layer"), CaptureError::Denied(_)));
        assert!(matches!(CaptureError::from_stderr("device offline"), CaptureError::Failed(_)));
    }

    #[test]
    fn test_fallback_frame_decodes() {
        let shot = Screenshot::fallback((12, 24), FallbackReason::CaptureFailed);
        let png = STANDARD.decode(&shot.base64_data).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (12, 24));
    }
}
