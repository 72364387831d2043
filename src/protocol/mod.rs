pub mod codec;
pub mod message;
pub mod size_guard;

pub use codec::{decode, Decoded, MessageFilter, Rejection};
pub use message::{ContextId, DeliveryMode, Envelope, MessageKind, WireForm, WireMessage};
pub use size_guard::{guard_payload, GuardOutcome, GuardedPayload, TRUNCATION_MARKER};
