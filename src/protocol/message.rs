use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CompletionPayload, TaskConfig};

pub const CONFIG_TYPE: &str = "CONFIG";
pub const TASK_COMPLETE_TYPE: &str = "TASK_COMPLETE";

/// Every message that may cross the frame boundary, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "CONFIG")]
    Config { config: TaskConfig },
    #[serde(rename = "TASK_COMPLETE")]
    TaskComplete(CompletionPayload),
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WireMessage::Config { .. } => MessageKind::Config,
            WireMessage::TaskComplete(_) => MessageKind::TaskComplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Config,
    TaskComplete,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            CONFIG_TYPE => Some(MessageKind::Config),
            TASK_COMPLETE_TYPE => Some(MessageKind::TaskComplete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Config => CONFIG_TYPE,
            MessageKind::TaskComplete => TASK_COMPLETE_TYPE,
        }
    }
}

/// What actually travels: a structured clone or a pre-serialized string.
#[derive(Debug, Clone, PartialEq)]
pub enum WireForm {
    Structured(Value),
    Text(String),
}

/// Identity of the browsing context a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A received message together with where it claims to come from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: String,
    pub source: ContextId,
    pub data: WireForm,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, source: ContextId, data: WireForm) -> Self {
        Self {
            origin: origin.into(),
            source,
            data,
        }
    }
}

/// How a sender transmits an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    Structured,
    Text,
    /// Structured first, then the same message as text.
    Both,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Both
    }
}
