//! Scripted doubles for unit tests. No device or network needed.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{ArtifactStore, Capability, CommandRunner, DeviceError, Platform, Point, ShellError, ShellOutput};
use crate::model::{Conversation, DecisionModel, ModelError, ModelResponse};
use crate::screenshot::{CaptureError, FrameSource, Screenshot};

/// Solid-colour frame encoded as `format`.
pub fn frame_bytes(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb(rgb)));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

/// Shell runner replaying queued outputs and recording argument lines.
pub struct ScriptedRunner {
    program: String,
    replies: Mutex<VecDeque<Result<ShellOutput, ShellError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, output: ShellOutput) {
        self.replies.lock().unwrap().push_back(Ok(output));
    }

    pub fn push_stdout(&self, stdout: &str) {
        self.push(ShellOutput::ok(stdout));
    }

    pub fn push_err(&self, err: ShellError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    /// Every invocation as a space-joined argument line.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String], _timeout: Duration) -> Result<ShellOutput, ShellError> {
        self.calls.lock().unwrap().push(args.join(" "));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ShellOutput::ok("")))
    }
}

/// Frame source replaying queued results; the last one repeats.
pub struct ScriptedFrames {
    frames: Mutex<VecDeque<Result<Vec<u8>, CaptureError>>>,
    grabs: AtomicUsize,
}

impl ScriptedFrames {
    pub fn new(frames: Vec<Result<Vec<u8>, CaptureError>>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            grabs: AtomicUsize::new(0),
        }
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn grab(&self, _timeout: Duration) -> Result<Vec<u8>, CaptureError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        let mut frames = self.frames.lock().unwrap();
        if frames.len() > 1 {
            frames.pop_front().unwrap()
        } else {
            frames.front().cloned().unwrap_or(Err(CaptureError::Timeout))
        }
    }
}

/// In-memory scratch file.
pub struct FakeStore {
    present: AtomicBool,
    stuck: bool,
    failure: Option<ShellError>,
    mtime: Option<String>,
    listing: Option<String>,
    removals: AtomicUsize,
}

impl FakeStore {
    fn with_state(present: bool, stuck: bool, failure: Option<ShellError>) -> Self {
        Self {
            present: AtomicBool::new(present),
            stuck,
            failure,
            mtime: None,
            listing: None,
            removals: AtomicUsize::new(0),
        }
    }

    pub fn absent() -> Self {
        Self::with_state(false, false, None)
    }

    pub fn present() -> Self {
        Self::with_state(true, false, None)
    }

    /// Present and survives every removal.
    pub fn stuck() -> Self {
        Self::with_state(true, true, None)
    }

    /// Every operation fails with `err`.
    pub fn failing(err: ShellError) -> Self {
        Self::with_state(true, false, Some(err))
    }

    pub fn with_mtime(mut self, mtime: String) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_listing(mut self, listing: String) -> Self {
        self.listing = Some(listing);
        self
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ShellError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn exists(&self, _path: &str, _timeout: Duration) -> Result<bool, ShellError> {
        self.check()?;
        Ok(self.is_present())
    }

    async fn remove(&self, _path: &str, _timeout: Duration) -> Result<(), ShellError> {
        self.check()?;
        self.removals.fetch_add(1, Ordering::SeqCst);
        if !self.stuck {
            self.present.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn modified_at(&self, _path: &str, _timeout: Duration) -> Result<Option<String>, ShellError> {
        self.check()?;
        Ok(if self.is_present() { self.mtime.clone() } else { None })
    }

    async fn describe(&self, _path: &str, _timeout: Duration) -> Result<Option<String>, ShellError> {
        self.check()?;
        Ok(if self.is_present() { self.listing.clone() } else { None })
    }
}

/// Shared view of the gestures a [`FakeDriver`] received.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }
}

/// Capability double recording every gesture.
pub struct FakeDriver {
    platform: Platform,
    shots: Mutex<VecDeque<Screenshot>>,
    calls: CallLog,
    fail_on: Option<&'static str>,
    known_apps: Vec<&'static str>,
    store: Option<FakeStore>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            platform: Platform::Adb,
            shots: Mutex::new(VecDeque::new()),
            calls: CallLog::default(),
            fail_on: None,
            known_apps: vec!["Settings", "微信"],
            store: None,
        }
    }

    /// Queue screenshots; once drained a plain real frame is returned.
    pub fn with_shots(self, shots: Vec<Screenshot>) -> Self {
        *self.shots.lock().unwrap() = shots.into();
        self
    }

    /// Make the named gesture fail with a command error.
    pub fn failing_on(mut self, gesture: &'static str) -> Self {
        self.fail_on = Some(gesture);
        self
    }

    pub fn with_store(mut self, store: FakeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Handle that stays readable after the driver is boxed into a session.
    pub fn log(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, call: String) -> Result<(), DeviceError> {
        let name = call.split_whitespace().next().unwrap_or_default().to_string();
        self.calls.push(call);
        if self.fail_on == Some(name.as_str()) {
            return Err(DeviceError::CommandFailed {
                command: name,
                message: "device offline".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for FakeDriver {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        self.record(format!("tap {} {}", at.x, at.y))
    }

    async fn double_tap(&self, at: Point) -> Result<(), DeviceError> {
        self.record(format!("double_tap {} {}", at.x, at.y))
    }

    async fn long_press(&self, at: Point) -> Result<(), DeviceError> {
        self.record(format!("long_press {} {}", at.x, at.y))
    }

    async fn swipe(&self, from: Point, to: Point, _duration: Option<Duration>) -> Result<(), DeviceError> {
        self.record(format!("swipe {} {} {} {}", from.x, from.y, to.x, to.y))
    }

    async fn back(&self) -> Result<(), DeviceError> {
        self.record("back".into())
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.record("home".into())
    }

    async fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        self.record(format!("launch {}", app_name))?;
        Ok(self.known_apps.contains(&app_name))
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        self.record(format!("type {}", text))
    }

    async fn clear_text(&self) -> Result<(), DeviceError> {
        self.record("clear".into())
    }

    async fn screenshot(&self) -> Screenshot {
        self.calls.push("screenshot".into());
        self.shots
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Screenshot::new("aGVsbG8=".into(), 1080, 2400))
    }

    async fn current_app(&self) -> String {
        "System Home".into()
    }

    fn scratch_artifact(&self) -> Option<&dyn ArtifactStore> {
        self.store.as_ref().map(|s| s as &dyn ArtifactStore)
    }
}

/// Decision model replaying queued replies and recording what it was shown.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    seen: Mutex<Vec<Conversation>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replies built from raw action strings, e.g. `do(action="Back")`.
    pub fn actions(actions: &[&str]) -> Self {
        Self::new(
            actions
                .iter()
                .map(|a| {
                    Ok(ModelResponse {
                        thinking: "thinking".into(),
                        action: a.to_string(),
                        raw_content: a.to_string(),
                    })
                })
                .collect(),
        )
    }

    /// Snapshots of every conversation passed to `request`.
    pub fn seen(&self) -> Vec<Conversation> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionModel for ScriptedModel {
    async fn request(&self, conversation: &Conversation) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(conversation.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ModelResponse {
                thinking: String::new(),
                action: "do(action=\"Wait\", duration=\"0 seconds\")".into(),
                raw_content: String::new(),
            })
        })
    }
}
