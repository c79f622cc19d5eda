//! Action dispatch onto the device driver, with confirmation and takeover gates.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use super::parser::Action;
use crate::device::{DeviceError, DeviceSession, Point};

/// Longest pause a `Wait` action may request.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Result of an action execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
    pub requires_confirmation: bool,
}

impl ActionResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
            requires_confirmation: false,
        }
    }

    /// Create a failure result. The run continues.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
            requires_confirmation: false,
        }
    }

    /// Create a finish result.
    pub fn finish(message: Option<String>) -> Self {
        Self {
            success: true,
            should_finish: true,
            message,
            requires_confirmation: false,
        }
    }
}

/// The action that actually ran, paired with its result.
///
/// `action` differs from the requested one only when a driver fault was
/// converted into a synthetic `Finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub action: Action,
    pub result: ActionResult,
}

/// Callback type for confirmation requests.
pub type ConfirmationCallback = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Callback type for takeover requests. The returned flag is reserved for
/// aborting the run; it is currently always treated as "continue".
pub type TakeoverCallback = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Executes parsed actions against a device session.
pub struct ActionHandler {
    session: Arc<DeviceSession>,
    confirmation_callback: ConfirmationCallback,
    takeover_callback: TakeoverCallback,
}

impl ActionHandler {
    /// Create a handler. Missing callbacks fall back to console prompts.
    pub fn new(
        session: Arc<DeviceSession>,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> Self {
        Self {
            session,
            confirmation_callback: confirmation_callback
                .unwrap_or_else(|| Box::new(default_confirmation)),
            takeover_callback: takeover_callback.unwrap_or_else(|| Box::new(default_takeover)),
        }
    }

    /// Execute `action`. Driver faults never escape: they end the run through
    /// a synthetic `Finish` carrying the fault text.
    pub async fn dispatch(&self, action: Action) -> Dispatched {
        match self.execute(&action).await {
            Ok(result) => Dispatched { action, result },
            Err(e) => {
                let text = format!("Action failed: {}", e);
                tracing::error!("{} ({})", text, action.name());
                Dispatched {
                    action: Action::finish(text.clone()),
                    result: ActionResult {
                        success: false,
                        should_finish: true,
                        message: Some(text),
                        requires_confirmation: false,
                    },
                }
            }
        }
    }

    async fn execute(&self, action: &Action) -> Result<ActionResult, DeviceError> {
        let driver = self.session.driver();

        let result = match action {
            Action::Finish { message } => ActionResult::finish(message.clone()),
            Action::Launch { app } => {
                if driver.launch(app).await? {
                    ActionResult::success()
                } else {
                    ActionResult::failure(format!("App not found: {}", app))
                }
            }
            Action::Tap { point, message } => {
                if let Some(failure) = check_range(*point, "element") {
                    return Ok(failure);
                }
                if let Some(message) = message {
                    if !(self.confirmation_callback)(message) {
                        tracing::info!("Sensitive tap rejected: {}", message);
                        return Ok(ActionResult {
                            success: false,
                            should_finish: false,
                            message: Some("User cancelled sensitive operation".to_string()),
                            requires_confirmation: true,
                        });
                    }
                }
                driver.tap(*point).await?;
                ActionResult::success()
            }
            Action::Type { text } => {
                driver.type_text(text).await?;
                ActionResult::success()
            }
            Action::Swipe { start, end } => {
                if let Some(failure) = check_range(*start, "start").or_else(|| check_range(*end, "end")) {
                    return Ok(failure);
                }
                driver.swipe(*start, *end, None).await?;
                ActionResult::success()
            }
            Action::DoubleTap { point } => {
                if let Some(failure) = check_range(*point, "element") {
                    return Ok(failure);
                }
                driver.double_tap(*point).await?;
                ActionResult::success()
            }
            Action::LongPress { point } => {
                if let Some(failure) = check_range(*point, "element") {
                    return Ok(failure);
                }
                driver.long_press(*point).await?;
                ActionResult::success()
            }
            Action::Wait { seconds } => {
                tokio::time::sleep(wait_duration(*seconds)).await;
                ActionResult::success()
            }
            Action::Back => {
                driver.back().await?;
                ActionResult::success()
            }
            Action::Home => {
                driver.home().await?;
                ActionResult::success()
            }
            Action::TakeOver { message } => {
                // Either answer resumes the run.
                let _ = (self.takeover_callback)(message);
                ActionResult::success()
            }
            Action::Note { .. } | Action::CallApi { .. } => ActionResult::success(),
            Action::Interact => ActionResult {
                success: true,
                should_finish: false,
                message: Some("User interaction required".to_string()),
                requires_confirmation: false,
            },
        };

        Ok(result)
    }
}

/// Model-supplied wait clamped to `0..=MAX_WAIT`; NaN waits one second.
fn wait_duration(seconds: f64) -> Duration {
    if seconds.is_nan() {
        return Duration::from_secs(1);
    }
    Duration::try_from_secs_f64(seconds.max(0.0))
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT)
}

fn check_range(point: Point, name: &str) -> Option<ActionResult> {
    if point.is_normalized() {
        return None;
    }
    Some(ActionResult::failure(format!(
        "Coordinate error for {}: {} is out of bounds. Valid range is [0, 999] on both axes.",
        name, point
    )))
}

/// Default confirmation callback using console input.
fn default_confirmation(message: &str) -> bool {
    print!("Sensitive operation: {}\nConfirm? (Y/N): ", message);
    let _ = io::stdout().flush();

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }

    line.trim().eq_ignore_ascii_case("y")
}

/// Default takeover callback using console input.
fn default_takeover(message: &str) -> bool {
    print!("{}\nPress Enter after completing manual operation...", message);
    let _ = io::stdout().flush();

    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, FakeDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler_with(driver: FakeDriver, confirm: bool) -> (ActionHandler, CallLog) {
        let log = driver.log();
        let session = Arc::new(DeviceSession::with_driver(Box::new(driver), None));
        let handler = ActionHandler::new(
            session,
            Some(Box::new(move |_: &str| confirm)),
            Some(Box::new(|_: &str| true)),
        );
        (handler, log)
    }

    #[tokio::test]
    async fn test_tap_executes() {
        let (handler, log) = handler_with(FakeDriver::new(), true);
        let out = handler
            .dispatch(Action::Tap {
                point: Point::new(500, 500),
                message: None,
            })
            .await;

        assert!(out.result.success);
        assert!(!out.result.should_finish);
        assert_eq!(log.calls(), vec!["tap 500 500"]);
    }

    #[tokio::test]
    async fn test_rejected_confirmation_continues_without_tapping() {
        let (handler, log) = handler_with(FakeDriver::new(), false);
        let out = handler
            .dispatch(Action::Tap {
                point: Point::new(500, 500),
                message: Some("Pay 100".into()),
            })
            .await;

        assert!(!out.result.success);
        assert!(!out.result.should_finish);
        assert!(out.result.requires_confirmation);
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_is_non_fatal() {
        let (handler, log) = handler_with(FakeDriver::new(), true);
        let out = handler
            .dispatch(Action::Swipe {
                start: Point::new(500, 800),
                end: Point::new(500, 1200),
            })
            .await;

        assert!(!out.result.success);
        assert!(!out.result.should_finish);
        assert!(out.result.message.unwrap().contains("out of bounds"));
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_driver_fault_becomes_finish() {
        let (handler, _log) = handler_with(FakeDriver::new().failing_on("back"), true);
        let out = handler.dispatch(Action::Back).await;

        assert!(out.action.is_finish());
        assert!(out.result.should_finish);
        assert!(!out.result.success);
        assert!(out.result.message.unwrap().contains("device offline"));
    }

    #[tokio::test]
    async fn test_unknown_app_is_failure() {
        let (handler, _log) = handler_with(FakeDriver::new(), true);
        let out = handler.dispatch(Action::Launch { app: "Nope".into() }).await;
        assert!(!out.result.success);
        assert!(!out.result.should_finish);

        let out = handler.dispatch(Action::Launch { app: "Settings".into() }).await;
        assert!(out.result.success);
    }

    #[tokio::test]
    async fn test_takeover_invokes_hook_and_continues() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let session = Arc::new(DeviceSession::with_driver(Box::new(FakeDriver::new()), None));
        let handler = ActionHandler::new(
            session,
            None,
            Some(Box::new(move |_: &str| {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            })),
        );

        let out = handler
            .dispatch(Action::TakeOver {
                message: "Log in please".into(),
            })
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(out.result.success);
        assert!(!out.result.should_finish);
    }

    #[tokio::test]
    async fn test_finish_and_passive_actions() {
        let (handler, log) = handler_with(FakeDriver::new(), true);

        let out = handler.dispatch(Action::finish("done")).await;
        assert!(out.result.should_finish);
        assert_eq!(out.result.message.as_deref(), Some("done"));

        let out = handler.dispatch(Action::Note { message: "price".into() }).await;
        assert!(out.result.success);
        let out = handler.dispatch(Action::Wait { seconds: 0.0 }).await;
        assert!(out.result.success);
        assert!(log.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_wait_is_clamped() {
        let (handler, _log) = handler_with(FakeDriver::new(), true);
        let action = crate::actions::parse_action(
            r#"do(action="Wait", duration="99999999999999999999 seconds")"#,
        )
        .unwrap();

        let started = tokio::time::Instant::now();
        let out = handler.dispatch(action).await;

        assert!(out.result.success);
        assert!(!out.result.should_finish);
        assert_eq!(started.elapsed(), MAX_WAIT);
    }

    #[test]
    fn test_wait_duration_bounds() {
        assert_eq!(wait_duration(2.5), Duration::from_millis(2500));
        assert_eq!(wait_duration(-3.0), Duration::ZERO);
        assert_eq!(wait_duration(f64::INFINITY), MAX_WAIT);
        assert_eq!(wait_duration(f64::NAN), Duration::from_secs(1));
        assert_eq!(wait_duration(1e20), MAX_WAIT);
    }
}
