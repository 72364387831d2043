pub mod controller;
pub mod state;

pub use controller::{HostController, HostSnapshot, Progress};
pub use state::{Handshake, HandshakeError, Transition};
