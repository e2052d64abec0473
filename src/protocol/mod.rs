//! Line protocol: envelope framing, message grammar and dispatch

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod latency;
pub mod message;

pub use dispatch::{Dispatcher, Outcome};
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use latency::LatencyTracker;
pub use message::{Captures, Message};
