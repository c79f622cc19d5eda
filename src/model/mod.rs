//! Model client module for AI inference.

mod client;
mod message;

pub use client::{DecisionModel, ModelClient, ModelConfig, ModelError, ModelResponse};
pub use message::{build_screen_info, Conversation, Message, Role};
