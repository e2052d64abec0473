//! Protocol-level failures

/// Errors raised while decoding or encoding wire lines
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Couldn't parse an envelope from '{0}'")]
    MalformedEnvelope(String),

    #[error("Capture {index} of '{body}' is not a valid {expected}")]
    MalformedCapture {
        body: String,
        index: usize,
        expected: &'static str,
    },

    #[error("Create is not supported for the {0} message")]
    CreateNotSupported(&'static str),

    #[error("{message} takes {expected} arguments, got {got}")]
    WrongArgumentCount {
        message: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// A bad line can be skipped without tearing the connection down.
    /// Everything else points at a peer speaking a different protocol.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::MalformedEnvelope(_))
    }
}
