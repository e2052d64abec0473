//! Failures raised by the game state and event log

use super::player::PlayerKey;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// An event claims to predate the point after which history is complete
    #[error("Event at {event_time} is before the confidence point {confidence_point}")]
    ConfidenceViolation {
        event_time: f64,
        confidence_point: f64,
    },

    #[error("Tried to move the confidence point back from {current} to {requested}")]
    ConfidenceRegression { requested: f64, current: f64 },

    #[error("Slot {0} is already occupied")]
    SlotOccupied(PlayerKey),

    #[error("No free player slots left")]
    TooManyPlayers,

    #[error("Malformed effect value '{0}'")]
    MalformedValue(String),

    #[error("No effect with id '{id}' on parameter {parameter}")]
    EffectNotFound { parameter: String, id: String },

    #[error("Unknown parameter {0}")]
    UnknownParameter(String),
}
