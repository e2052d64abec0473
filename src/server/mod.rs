//! Server side of the link: connections, their registry and message handling

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod registry;

pub use broadcast::Broadcaster;
pub use connection::{ConnectionId, ServerConnection};
pub use handler::ServerMsgHandler;
pub use registry::ConnectionRegistry;
