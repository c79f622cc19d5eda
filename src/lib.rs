// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Mobile Agent
//!
//! Closed-loop mobile device automation driven by a vision-language model.
//!
//! Each step captures the screen, asks the model for the next action and
//! performs it on the device. Android devices are driven through ADB,
//! HarmonyOS devices through HDC and iOS devices through WebDriverAgent.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mobile_agent::{AgentConfig, DeviceSession, ModelClient, ModelConfig, PhoneAgent, Platform, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = DeviceSession::open(Platform::Hdc, SessionOptions::default()).await?;
//!     let model = ModelClient::new(ModelConfig::default());
//!
//!     let mut agent = PhoneAgent::new(Arc::new(session), Box::new(model), AgentConfig::default(), None, None);
//!     let report = agent.run("打开设置").await?;
//!
//!     println!("Task result: {}", report.message());
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod adb;
pub mod agent;
pub mod cleanup;
pub mod config;
pub mod device;
pub mod hdc;
pub mod model;
pub mod retry;
pub mod screenshot;
pub mod settings;
pub mod xctest;

#[cfg(test)]
mod testing;

pub use actions::{Action, ActionHandler, ActionResult};
pub use agent::{AgentConfig, AgentError, PhoneAgent, RunOutcome, RunReport, StepResult};
pub use cleanup::CleanupManager;
pub use device::{
    Capability, ConnectionError, ConnectionManager, DeviceError, DeviceInfo, DeviceSession, Platform, Point,
    SessionOptions,
};
pub use model::{DecisionModel, ModelClient, ModelConfig, ModelResponse};
pub use screenshot::Screenshot;
pub use settings::{AppSettings, SettingsError};
