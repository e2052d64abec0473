//! Tokio TCP transport for both ends of the link

pub mod client;
pub mod framing;
pub mod server;

pub use client::{ClientLink, ClientLinkError, SessionEnd};
pub use framing::LineBuffer;
pub use server::{run_connection, serve};
