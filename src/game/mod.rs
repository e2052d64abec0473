//! Game state and its reconciliation
//!
//! Events flow in through [`GameLogic`], land in the [`EventLog`], and are
//! applied to a [`MomentaryState`] in server-time order however late they arrive.

pub mod error;
pub mod events;
pub mod log;
pub mod logic;
pub mod notify;
pub mod parameters;
pub mod pattern;
pub mod player;
pub mod state;

pub use error::GameError;
pub use events::{Event, EventKind};
pub use log::EventLog;
pub use logic::GameLogic;
pub use notify::{Notification, StateListener};
pub use parameters::Parameters;
pub use player::{Player, PlayerKey, PlayerStats};
pub use state::{ClientState, MomentaryState, Role};
