//! Actions module for handling AI model outputs.

mod handler;
mod parser;

pub use handler::{ActionHandler, ActionResult, ConfirmationCallback, Dispatched, TakeoverCallback};
pub use parser::{parse_action, Action, ActionError};
