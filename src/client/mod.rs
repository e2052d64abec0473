//! Gun side of the link: server message handling, identity and reconnect backoff

pub mod handler;
pub mod identity;
pub mod reconnect;

pub use handler::ClientMsgHandler;
pub use identity::client_id;
pub use reconnect::ReconnectPolicy;
