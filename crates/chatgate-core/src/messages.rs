use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Inbound chat request, shared by the HTTP routes and WebSocket frames.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

impl ChatRequest {
    /// Reject requests without a usable message.
    pub fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("message is required".into());
        }
        Ok(())
    }

    pub fn into_prompt(self) -> ChatPrompt {
        ChatPrompt {
            message: self.message,
            user_id: self.user_id,
        }
    }
}

/// Prompt handed to a chunk source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatPrompt {
    pub message: String,
    pub user_id: Option<String>,
}

impl ChatPrompt {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: None,
        }
    }
}

/// One-shot result from a chunk source.
#[derive(Clone, Debug, Default)]
pub struct ChatCompletion {
    pub text: String,
    pub model: Option<String>,
}

/// Reply payload sent to clients: `{reply, messageId, timestamp}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub message_id: MessageId,
    /// Unix seconds.
    pub timestamp: i64,
}

impl ChatReply {
    pub fn new(reply: impl Into<String>, message_id: MessageId, timestamp: i64) -> Self {
        Self {
            reply: reply.into(),
            message_id,
            timestamp,
        }
    }
}
