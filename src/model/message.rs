//! Role-tagged conversation context in the OpenAI chat-completions shape.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message, optionally carrying a base64 PNG.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub image: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            image: None,
        }
    }

    pub fn user(text: impl Into<String>, image: Option<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    /// Render as an OpenAI chat message. User messages use the content-part
    /// array form with the image first.
    pub fn to_openai(&self) -> Value {
        match self.role {
            Role::User => {
                let mut content = Vec::new();
                if let Some(data) = &self.image {
                    content.push(json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{}", data) }
                    }));
                }
                content.push(json!({ "type": "text", "text": self.text }));
                json!({ "role": self.role, "content": content })
            }
            _ => json!({ "role": self.role, "content": self.text }),
        }
    }
}

/// Ordered message history for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drop the image from the newest message to keep the context small.
    pub fn strip_last_image(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            last.image = None;
        }
    }

    /// Number of messages still carrying an image.
    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.image.is_some()).count()
    }

    pub fn to_openai(&self) -> Vec<Value> {
        self.messages.iter().map(Message::to_openai).collect()
    }
}

/// Screen info block sent alongside each capture.
pub fn build_screen_info(current_app: &str) -> String {
    json!({ "current_app": current_app }).to_string()
}
