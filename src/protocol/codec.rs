//! Translation between [`WireMessage`] and the untyped values that cross the frame
//! boundary. The channel is public: inbound decoding never fails loudly.

use serde_json::Value;

use super::message::{ContextId, DeliveryMode, Envelope, MessageKind, WireForm, WireMessage};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Result of decoding one received value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(WireMessage),
    /// Known `type`, but the body does not match its schema.
    Malformed { kind: MessageKind, reason: String },
    /// Not JSON, not an object, no `type`, or a `type` we do not speak.
    Unrecognized { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    WrongOrigin { origin: String },
    WrongSource { source: ContextId },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::WrongOrigin { origin } => write!(f, "unexpected origin '{origin}'"),
            Rejection::WrongSource { source } => write!(f, "unexpected source context '{source}'"),
        }
    }
}

pub fn encode(message: &WireMessage) -> serde_json::Result<Value> {
    serde_json::to_value(message)
}

pub fn encode_text(message: &WireMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// The forms to transmit for `message`, in sending order.
pub fn outbound(message: &WireMessage, mode: DeliveryMode) -> serde_json::Result<Vec<WireForm>> {
    let forms = match mode {
        DeliveryMode::Structured => vec![WireForm::Structured(encode(message)?)],
        DeliveryMode::Text => vec![WireForm::Text(encode_text(message)?)],
        DeliveryMode::Both => vec![
            WireForm::Structured(encode(message)?),
            WireForm::Text(encode_text(message)?),
        ],
    };
    Ok(forms)
}

pub fn decode(form: &WireForm) -> Decoded {
    match form {
        WireForm::Structured(value) => decode_value(value.clone()),
        WireForm::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => decode_value(value),
            Err(err) => Decoded::Unrecognized {
                reason: format!("text payload is not JSON: {err}"),
            },
        },
    }
}

fn decode_value(value: Value) -> Decoded {
    let kind = match value.get("type") {
        Some(Value::String(tag)) => match MessageKind::from_tag(tag) {
            Some(kind) => kind,
            None => {
                return Decoded::Unrecognized {
                    reason: format!("unknown message type '{tag}'"),
                }
            }
        },
        Some(_) => {
            return Decoded::Unrecognized {
                reason: "message type is not a string".into(),
            }
        }
        None => {
            return Decoded::Unrecognized {
                reason: "payload has no message type".into(),
            }
        }
    };

    match serde_json::from_value::<WireMessage>(value) {
        Ok(message) => Decoded::Message(message),
        Err(err) => Decoded::Malformed {
            kind,
            reason: err.to_string(),
        },
    }
}

/// Who a receiver is willing to hear from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    /// `None` accepts any origin.
    pub expected_origin: Option<String>,
    /// `None` accepts any source context.
    pub expected_source: Option<ContextId>,
}

impl MessageFilter {
    pub fn new(expected_origin: Option<String>, expected_source: Option<ContextId>) -> Self {
        Self {
            expected_origin: expected_origin.map(|o| normalize_origin(&o).to_string()),
            expected_source,
        }
    }

    pub fn check(&self, envelope: &Envelope) -> Result<(), Rejection> {
        if let Some(expected) = &self.expected_origin {
            if normalize_origin(&envelope.origin) != expected {
                return Err(Rejection::WrongOrigin {
                    origin: envelope.origin.clone(),
                });
            }
        }
        if let Some(expected) = &self.expected_source {
            if &envelope.source != expected {
                return Err(Rejection::WrongSource {
                    source: envelope.source.clone(),
                });
            }
        }
        Ok(())
    }

    /// Filter then decode. Rejected envelopes are logged and yield `None`.
    pub fn accept(&self, envelope: &Envelope) -> Option<Decoded> {
        match self.check(envelope) {
            Ok(()) => Some(decode(&envelope.data)),
            Err(rejection) => {
                log_debug!("discarding message: {rejection}");
                None
            }
        }
    }
}

fn normalize_origin(origin: &str) -> &str {
    origin.trim_end_matches('/')
}
