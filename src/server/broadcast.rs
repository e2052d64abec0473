//! Pushes state changes out to the guns

use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::game::{Player, PlayerKey, StateListener};
use crate::protocol::message::{PLAYER_SNAPSHOT, START_GAME, STOP_GAME};
use crate::protocol::ProtocolError;

/// Event log listener which tells connected clients what changed
pub struct Broadcaster {
    registry: Weak<ConnectionRegistry>,
}

impl Broadcaster {
    /// Build a broadcaster and register it with the registry's log
    pub fn attach(registry: &Arc<ConnectionRegistry>) -> Arc<Self> {
        let broadcaster = Arc::new(Self {
            registry: Arc::downgrade(registry),
        });
        registry.log().add_listener(broadcaster.clone());
        broadcaster
    }

    fn registry(&self) -> Option<Arc<ConnectionRegistry>> {
        self.registry.upgrade()
    }

    fn send_to_all(&self, body: Result<String, ProtocolError>) {
        let Some(registry) = self.registry() else {
            return;
        };
        match body {
            Ok(body) => registry.queue_message_to_all(&body),
            Err(e) => warn!(error = %e, "Couldn't build broadcast"),
        }
    }
}

impl StateListener for Broadcaster {
    fn game_started(&self) {
        let Some(registry) = self.registry() else {
            return;
        };
        let remaining = registry
            .log()
            .game_time_remaining()
            .unwrap_or(0.0)
            .max(0.0) as i64;
        debug!(remaining, "Broadcasting game start");
        self.send_to_all(START_GAME.create(&[&remaining]));
    }

    fn game_stopped(&self) {
        debug!("Broadcasting game stop");
        self.send_to_all(STOP_GAME.create(&[]));
    }

    fn player_adjusted(&self, key: PlayerKey, player: &Player) {
        let Some(registry) = self.registry() else {
            return;
        };
        let body = player
            .to_json()
            .map_err(ProtocolError::from)
            .and_then(|json| PLAYER_SNAPSHOT.create(&[&json]));
        match body {
            Ok(body) => registry.queue_message(key, &body),
            Err(e) => warn!(error = %e, player = %key, "Couldn't build player snapshot"),
        }
    }

    fn player_moved(&self, from: PlayerKey, player: &Player) {
        if let Some(registry) = self.registry() {
            registry.move_player(from, player.key());
        }
    }
}
