//! BraidsTag - event-reconciling server core for a networked laser-tag game
//!
//! Guns report trigger pulls and hits over TCP, stamped with the time they
//! happened. The [`game::EventLog`] keeps every event newer than its
//! confidence point and replays them in time order whenever a late one turns
//! up, telling clients about any player whose state changed as a result.

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod server;
pub mod util;

pub use error::LinkError;
