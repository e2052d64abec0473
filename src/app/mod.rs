//! Application wiring: shared state and administrative actions

pub mod state;

pub use state::{AppState, ResetError};
