//! Application state shared across connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::game::state::MomentaryState;
use crate::game::{EventLog, GameError, GameLogic, Player, PlayerKey, Role};
use crate::protocol::message::RESET_GAME;
use crate::protocol::ProtocolError;
use crate::server::{Broadcaster, ConnectionId, ConnectionRegistry, ServerMsgHandler};
use crate::util::time::Clock;
use crate::util::timer::Scheduler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub log: EventLog,
    pub logic: GameLogic,
    pub registry: Arc<ConnectionRegistry>,
    pub handler: ServerMsgHandler,
    broadcaster: Arc<Broadcaster>,
    next_connection_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config, clock: Arc<dyn Clock>, scheduler: Arc<dyn Scheduler>) -> Self {
        let config = Arc::new(config);

        // Initialize the event log
        let initial = MomentaryState::new(config.game_time_secs, config.team_count);
        let log = EventLog::with_state(Role::Server, Arc::clone(&clock), scheduler, initial);
        let logic = GameLogic::new(log.clone(), config.fire_repeat_rate_secs);

        // Initialize connection tracking
        let registry = Arc::new(ConnectionRegistry::new(
            log.clone(),
            config.out_of_contact_secs,
        ));
        let broadcaster = Broadcaster::attach(&registry);
        let handler = ServerMsgHandler::new(logic.clone(), Arc::clone(&registry));

        Self {
            config,
            clock,
            log,
            logic,
            registry,
            handler,
            broadcaster,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    // Game control

    /// Start now. A `duration` of zero means the configured game time.
    pub fn start_game(&self, duration: f64) -> Result<(), GameError> {
        info!(duration, "Starting game");
        self.logic.start_game(self.clock.now(), duration)
    }

    pub fn stop_game(&self) -> Result<(), GameError> {
        info!("Stopping game");
        self.logic.stop_game(self.clock.now())
    }

    pub fn reset_game(&self) -> Result<(), ResetError> {
        info!("Resetting game");
        self.logic.reset_game(self.clock.now())?;
        self.registry.queue_message_to_all(&RESET_GAME.create(&[])?);
        Ok(())
    }

    // Players

    /// Offer the next player slot to an uninitialised connection
    pub fn start_initialising(&self, connection: ConnectionId) -> bool {
        self.registry.start_initialising(connection)
    }

    pub fn create_new_player(&self) -> Result<Player, GameError> {
        self.log.create_new_player()
    }

    /// The connected gun follows its player to the new slot
    pub fn move_player(&self, src: PlayerKey, dst: PlayerKey) -> Result<(), GameError> {
        self.log.move_player(src, dst)
    }

    pub fn delete_player(&self, key: PlayerKey) {
        self.log.delete_player(key);
        self.registry.delete_player(key);
    }

    pub fn set_target_team_count(&self, count: u32) {
        self.log.set_target_team_count(count);
    }

    pub fn set_game_time(&self, secs: f64) {
        self.log.set_game_time(secs);
    }
}

/// Reset either failed in the log or couldn't be announced
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
