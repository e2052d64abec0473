//! Errors shared by the server and client message handlers

use crate::game::GameError;
use crate::protocol::ProtocolError;

/// Errors from handling one inbound line
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("No handler for message '{0}'")]
    UnknownMessage(String),
}

impl LinkError {
    /// Whether the peer should be disconnected.
    ///
    /// A garbled envelope is skipped and game errors are the caller's problem,
    /// but a well formed line we can't understand means the peer is speaking
    /// something else.
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Protocol(e) => !e.is_recoverable(),
            LinkError::Game(_) => false,
            LinkError::UnknownMessage(_) => true,
        }
    }
}
