//! Static configuration: app registries, prompts and UI strings.

pub mod apps;
mod i18n;
mod prompts;

pub use apps::{AppRegistry, StaticRegistry};
pub use i18n::{get_messages, Messages};
pub use prompts::{system_prompt, SYSTEM_PROMPT_EN, SYSTEM_PROMPT_ZH};
