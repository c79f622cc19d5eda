//! The agent control loop: capture, ask the model, act, repeat.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::actions::{Action, ActionHandler, ConfirmationCallback, TakeoverCallback};
use crate::cleanup::{CleanupManager, CleanupRecord, CleanupResult, DEFAULT_STALE_THRESHOLD};
use crate::config::{get_messages, system_prompt};
use crate::device::DeviceSession;
use crate::model::{build_screen_info, Conversation, DecisionModel, Message};
use crate::screenshot::Screenshot;

/// Attempts allowed for the first step when the capture needs recovery.
const FIRST_STEP_ATTEMPTS: u32 = 2;
const RECOVERY_SETTLE: Duration = Duration::from_secs(1);

/// Agent errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Task required for first step")]
    TaskRequired,
    #[error("Task must not be empty")]
    EmptyTask,
}

/// Configuration for the PhoneAgent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of steps before stopping.
    pub max_steps: u32,
    /// Device the session is bound to, for logs and cleanup records.
    pub device_id: Option<String>,
    /// Language code ("cn" for Chinese, "en" for English).
    pub lang: String,
    /// Custom system prompt (if None, uses default based on lang).
    pub system_prompt: Option<String>,
    /// Whether to print verbose output.
    pub verbose: bool,
    /// Remove the capture scratch file before and after each run.
    pub cleanup_enabled: bool,
    /// Age after which a leftover scratch file is swept at run start.
    pub stale_threshold: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            device_id: None,
            lang: "cn".to_string(),
            system_prompt: None,
            verbose: true,
            cleanup_enabled: true,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

impl AgentConfig {
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_enabled = enabled;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Disable verbose console output.
    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    /// The system prompt (custom or default based on language).
    pub fn get_system_prompt(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt(&self.lang))
    }
}

/// Result of a single agent step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Whether the action was successful.
    pub success: bool,
    /// Whether the task is finished.
    pub finished: bool,
    /// The action that was executed.
    pub action: Option<Action>,
    /// The thinking process from the model.
    pub thinking: String,
    /// Optional message (e.g., finish message).
    pub message: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A step finished the task (model `finish`, an aborting fault or a
    /// model error); carries the final message.
    Finished(String),
    /// The step budget ran out before anything finished the task.
    StepBudgetExhausted { steps: u32 },
}

/// Everything a call to [`PhoneAgent::run`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepResult>,
    pub step_count: u32,
}

impl RunReport {
    /// Final message, or a description of the exhausted budget.
    pub fn message(&self) -> String {
        match &self.outcome {
            RunOutcome::Finished(message) => message.clone(),
            RunOutcome::StepBudgetExhausted { steps } => format!("Max steps reached ({})", steps),
        }
    }
}

/// AI-powered agent automating a phone through a [`DeviceSession`].
///
/// The agent uses a vision-language model to understand screen content
/// and decide on actions to complete user tasks.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use mobile_agent::{AgentConfig, DeviceSession, ModelClient, ModelConfig, PhoneAgent, Platform, SessionOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let session = DeviceSession::open(Platform::Adb, SessionOptions::default()).await?;
///     let model = ModelClient::new(ModelConfig::default());
///
///     let mut agent = PhoneAgent::new(Arc::new(session), Box::new(model), AgentConfig::default(), None, None);
///     let report = agent.run("打开微信").await?;
///
///     println!("Task result: {}", report.message());
///     Ok(())
/// }
/// ```
pub struct PhoneAgent {
    session: Arc<DeviceSession>,
    model: Box<dyn DecisionModel>,
    config: AgentConfig,
    handler: ActionHandler,
    cleanup: Option<CleanupManager>,
    context: Conversation,
    step_count: u32,
}

impl PhoneAgent {
    /// Create a new PhoneAgent.
    ///
    /// # Arguments
    /// * `session` - Open device session the agent drives.
    /// * `model` - Decision model consulted once per step.
    /// * `config` - Configuration for the agent behavior.
    /// * `confirmation_callback` - Optional callback for sensitive action confirmation.
    /// * `takeover_callback` - Optional callback for takeover requests.
    pub fn new(
        session: Arc<DeviceSession>,
        model: Box<dyn DecisionModel>,
        config: AgentConfig,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> Self {
        let handler = ActionHandler::new(session.clone(), confirmation_callback, takeover_callback);
        let cleanup = CleanupManager::for_platform(session.platform())
            .map(|m| m.with_device_id(config.device_id.clone().or_else(|| session.device_id().map(str::to_string))));

        Self {
            session,
            model,
            config,
            handler,
            cleanup,
            context: Conversation::new(),
            step_count: 0,
        }
    }

    /// Run the agent until the task finishes or the step budget runs out.
    ///
    /// The scratch capture file is swept before the first step and removed
    /// after the last one; cleanup failures are logged, never returned.
    pub async fn run(&mut self, task: &str) -> Result<RunReport, AgentError> {
        if task.trim().is_empty() {
            return Err(AgentError::EmptyTask);
        }

        let span = tracing::info_span!("run", session = %Uuid::new_v4());
        Ok(self.run_task(task).instrument(span).await)
    }

    async fn run_task(&mut self, task: &str) -> RunReport {
        self.reset();
        tracing::info!(
            "Starting task on {} device {}: {}",
            self.session.platform(),
            self.session.device_id().unwrap_or("<default>"),
            task
        );

        let session = self.session.clone();
        let scratch = session.driver().scratch_artifact();

        if let (Some(manager), Some(store), true) = (self.cleanup.as_mut(), scratch, self.config.cleanup_enabled) {
            log_cleanup(&manager.cleanup_stale(store, self.config.stale_threshold).await);
        }

        let mut steps = Vec::new();
        let first = self.execute_step(Some(task), true).await;
        let mut finished = first.finished.then(|| finish_message(&first));
        steps.push(first);

        while finished.is_none() && self.step_count < self.config.max_steps {
            let result = self.execute_step(None, false).await;
            if result.finished {
                finished = Some(finish_message(&result));
            }
            steps.push(result);
        }

        if let (Some(manager), Some(store), true) = (self.cleanup.as_mut(), scratch, self.config.cleanup_enabled) {
            log_cleanup(&manager.cleanup(store).await);
        }

        let outcome = match finished {
            Some(message) => RunOutcome::Finished(message),
            None => {
                tracing::warn!("Step budget of {} exhausted", self.config.max_steps);
                RunOutcome::StepBudgetExhausted {
                    steps: self.step_count,
                }
            }
        };

        RunReport {
            outcome,
            steps,
            step_count: self.step_count,
        }
    }

    /// Execute a single step of the agent.
    ///
    /// Useful for manual control or debugging.
    ///
    /// # Arguments
    /// * `task` - Task description (only needed for first step).
    pub async fn step(&mut self, task: Option<&str>) -> Result<StepResult, AgentError> {
        let is_first = self.context.is_empty();

        if is_first && task.is_none() {
            return Err(AgentError::TaskRequired);
        }

        Ok(self.execute_step(task, is_first).await)
    }

    /// Reset the agent state for a new task.
    pub fn reset(&mut self) {
        self.context.clear();
        self.step_count = 0;
    }

    /// Capture the screen, escaping a blocked first screen by going Home.
    async fn observe(&mut self, is_first: bool) -> Screenshot {
        let driver = self.session.driver();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.step_count += 1;

            let screenshot = driver.screenshot().await;
            if !(is_first && screenshot.needs_recovery() && attempt < FIRST_STEP_ATTEMPTS) {
                return screenshot;
            }

            tracing::warn!(
                "Screen unavailable on first step ({:?}), returning Home and retrying",
                screenshot.fallback
            );
            if let Err(e) = driver.home().await {
                tracing::warn!("Home during recovery failed: {}", e);
            }
            tokio::time::sleep(RECOVERY_SETTLE).await;
        }
    }

    /// Execute a single step of the agent loop.
    async fn execute_step(&mut self, user_prompt: Option<&str>, is_first: bool) -> StepResult {
        let screenshot = self.observe(is_first).await;
        let current_app = self.session.driver().current_app().await;
        let screen_info = build_screen_info(&current_app);

        if is_first {
            self.context.push(Message::system(self.config.get_system_prompt()));
            self.context.push(Message::user(
                format!("{}\n\n{}", user_prompt.unwrap_or_default(), screen_info),
                Some(screenshot.base64_data),
            ));
        } else {
            self.context.push(Message::user(
                format!("** Screen Info **\n\n{}", screen_info),
                Some(screenshot.base64_data),
            ));
        }

        let response = match self.model.request(&self.context).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Model error: {}", e);
                return StepResult {
                    success: false,
                    finished: true,
                    action: None,
                    thinking: String::new(),
                    message: Some(format!("Model error: {}", e)),
                };
            }
        };

        let action = Action::parse_or_finish(&response.action);
        if self.config.verbose {
            self.print_decision(&response.thinking, &action);
        }

        // Images are only needed for the request they were captured for.
        self.context.strip_last_image();

        let dispatched = self.handler.dispatch(action).await;

        self.context.push(Message::assistant(format!(
            "<think>{}</think><answer>{}</answer>",
            response.thinking, response.action
        )));

        let action = dispatched.action;
        let result = dispatched.result;
        let finished = action.is_finish() || result.should_finish;
        let message = result.message.or_else(|| match &action {
            Action::Finish { message } => message.clone(),
            _ => None,
        });

        if finished && self.config.verbose {
            let msgs = get_messages(&self.config.lang);
            println!("\n🎉 {}", "=".repeat(48));
            println!("✅ {}: {}", msgs.task_completed, message.as_deref().unwrap_or(msgs.done));
            println!("{}\n", "=".repeat(50));
        }

        StepResult {
            success: result.success,
            finished,
            action: Some(action),
            thinking: response.thinking,
            message,
        }
    }

    fn print_decision(&self, thinking: &str, action: &Action) {
        let msgs = get_messages(&self.config.lang);
        println!("\n{}", "=".repeat(50));
        println!("💭 {}:", msgs.thinking);
        println!("{}", "-".repeat(50));
        println!("{}", thinking);
        println!("{}", "-".repeat(50));
        println!("🎯 {}:", msgs.action);
        println!("{}", serde_json::to_string_pretty(action).unwrap_or_default());
        println!("{}\n", "=".repeat(50));
    }

    /// Get the current conversation context.
    pub fn context(&self) -> &Conversation {
        &self.context
    }

    /// Get the current step count.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Cleanup attempts made by this agent, oldest first.
    pub fn cleanup_history(&self) -> &[CleanupRecord] {
        self.cleanup.as_ref().map(|m| m.history()).unwrap_or_default()
    }
}

fn log_cleanup(result: &CleanupResult) {
    if result.success {
        tracing::debug!("Cleanup: {}", result.message);
    } else {
        tracing::warn!(
            "Cleanup failed ({}): {}",
            result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            result.message
        );
    }
}

fn finish_message(result: &StepResult) -> String {
    result
        .message
        .clone()
        .unwrap_or_else(|| "Task completed".to_string())
}
