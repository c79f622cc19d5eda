//! Agent module for orchestrating phone automation.

mod phone_agent;

pub use phone_agent::{AgentConfig, AgentError, PhoneAgent, RunOutcome, RunReport, StepResult};
