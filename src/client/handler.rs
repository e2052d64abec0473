//! Inbound message handling on the gun side

use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::LinkError;
use crate::game::{ClientState, GameLogic, Parameters, Player, PlayerKey};
use crate::protocol::message::{
    DELETED, PARAMETERS_SNAPSHOT, PING, PLAYER_SNAPSHOT, PONG, RESET_GAME, START_GAME,
    START_INITIALISING, STOP_GAME, TEAM_PLAYER,
};
use crate::protocol::{Captures, Dispatcher, Envelope, Outcome, ProtocolError};

struct Inbound {
    logic: GameLogic,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Arc<watch::Sender<bool>>,
    time: f64,
}

impl Inbound {
    /// Server messages act at the moment they arrive on our clock
    fn now(&self) -> f64 {
        self.logic.log().now()
    }

    fn reply(&self, body: String) {
        if self.outbound.send(body).is_err() {
            debug!("Link writer gone, dropping reply");
        }
    }
}

type Handlers = Dispatcher<Inbound, LinkError>;

fn messages() -> &'static Handlers {
    static MESSAGES: OnceLock<Handlers> = OnceLock::new();
    MESSAGES.get_or_init(|| {
        Dispatcher::new()
            .on(&TEAM_PLAYER, team_player)
            .on(&PLAYER_SNAPSHOT, player_snapshot)
            .on(&PARAMETERS_SNAPSHOT, parameters_snapshot)
            .on(&START_GAME, start_game)
            .on(&STOP_GAME, stop_game)
            .on(&DELETED, deleted)
            .on(&RESET_GAME, reset_game)
            .on(&START_INITIALISING, start_initialising)
            .on(&PING, ping)
            .on(&PONG, pong)
    })
}

/// Handles lines arriving from the server
#[derive(Clone)]
pub struct ClientMsgHandler {
    logic: GameLogic,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ClientMsgHandler {
    /// Replies go out on `outbound`. `shutdown` flips to true once the server
    /// has deleted us and we should stop reconnecting.
    pub fn new(
        logic: GameLogic,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            logic,
            outbound,
            shutdown,
        }
    }

    pub fn logic(&self) -> &GameLogic {
        &self.logic
    }

    pub fn handle_line(&self, line: &str) -> Result<(), LinkError> {
        let envelope = Envelope::parse(line)?;
        debug!(time = envelope.time, body = %envelope.body, "Received");

        let mut inbound = Inbound {
            logic: self.logic.clone(),
            outbound: self.outbound.clone(),
            shutdown: Arc::clone(&self.shutdown),
            time: envelope.time,
        };
        if !messages().dispatch(&mut inbound, &envelope.body)?.is_handled() {
            return Err(LinkError::UnknownMessage(envelope.body));
        }
        Ok(())
    }

    /// The link came up: we know nobody yet
    pub fn connected(&self) {
        self.logic.log().set_client_state(ClientState::Uninitialised);
    }

    pub fn disconnected(&self) {
        self.logic.log().set_client_state(ClientState::Offline);
    }
}

fn establish(inbound: &Inbound, player: Player) -> Result<(), LinkError> {
    info!(player = %player.key(), "Main player assigned");
    inbound.logic.set_main_player(inbound.now(), player)?;
    inbound
        .logic
        .log()
        .set_client_state(ClientState::Established);
    Ok(())
}

/// Older servers only tell us our slot, so we start from a default player
fn team_player(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let key = PlayerKey::new(caps.uint(0)?, caps.uint(1)?);
    establish(inbound, Player::new(key))?;
    Ok(Outcome::Handled)
}

fn player_snapshot(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let player = Player::from_json(caps.str(0)?).map_err(ProtocolError::from)?;
    establish(inbound, player)?;
    Ok(Outcome::Handled)
}

fn parameters_snapshot(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let parameters = Parameters::from_json(caps.str(0)?).map_err(ProtocolError::from)?;
    inbound.logic.set_parameters(inbound.now(), parameters)?;
    Ok(Outcome::Handled)
}

/// We take zero latency here, the server still decides when the game ends
fn start_game(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let duration = caps.int(0)?;
    inbound.logic.start_game(inbound.now(), duration as f64)?;
    Ok(Outcome::Handled)
}

fn stop_game(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound.logic.stop_game(inbound.now())?;
    Ok(Outcome::Handled)
}

fn deleted(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    info!("Deleted by the server, shutting down");
    inbound.logic.stop_game(inbound.now())?;
    inbound.shutdown.send_replace(true);
    Ok(Outcome::Handled)
}

fn reset_game(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound.logic.reset_game(inbound.now())?;
    Ok(Outcome::Handled)
}

fn start_initialising(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound
        .logic
        .log()
        .set_client_state(ClientState::Initialising);
    Ok(Outcome::Handled)
}

fn ping(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound.reply(PONG.create(&[&inbound.time, &0])?);
    Ok(Outcome::Handled)
}

fn pong(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    if caps.int(1)? != 0 {
        inbound.reply(PONG.create(&[&inbound.time, &0])?);
    }
    Ok(Outcome::Handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EventLog, Role};
    use crate::util::time::ManualClock;
    use crate::util::timer::ManualScheduler;

    struct Fixture {
        handler: ClientMsgHandler,
        clock: Arc<ManualClock>,
        outbound: mpsc::UnboundedReceiver<String>,
        shutdown: watch::Receiver<bool>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(100.0));
        let log = EventLog::new(Role::Client, clock.clone(), Arc::new(ManualScheduler::new()));
        let (tx, outbound) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        Fixture {
            handler: ClientMsgHandler::new(GameLogic::new(log, 0.0), tx, Arc::new(shutdown_tx)),
            clock,
            outbound,
            shutdown,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn ping_gets_a_pong_with_its_time() {
        let mut f = fixture();
        f.handler.handle_line("E(0,12.5,Ping())").unwrap();
        f.handler.handle_line("E(0,13,Pong(12,1))").unwrap();
        f.handler.handle_line("E(0,14,Pong(12,0))").unwrap();
        assert_eq!(
            drain(&mut f.outbound),
            vec!["Pong(12.5,0)", "Pong(13,0)"]
        );
    }

    #[test]
    fn team_player_establishes_a_default_player() {
        let f = fixture();
        f.handler.connected();
        f.handler.handle_line("E(0,100,TeamPlayer(2,5))").unwrap();

        let log = f.handler.logic().log();
        assert_eq!(log.client_state(), ClientState::Established);
        let me = log.main_player().unwrap();
        assert_eq!(me.key(), PlayerKey::new(2, 5));
        assert_eq!(me.ammo, Player::MAX_AMMO);
    }

    #[test]
    fn player_snapshot_replaces_main_player() {
        let f = fixture();
        f.handler
            .handle_line(r#"E(0,100,PlayerSnapshot({"teamID":1,"playerID":3,"ammo":40,"health":2,"gunDamage":1}))"#)
            .unwrap();

        let me = f.handler.logic().log().main_player().unwrap();
        assert_eq!(me.key(), PlayerKey::new(1, 3));
        assert_eq!(me.ammo, 40);
        assert_eq!(me.health, 2);
    }

    #[test]
    fn parameters_snapshot_is_applied() {
        let f = fixture();
        f.handler.handle_line("E(0,100,TeamPlayer(1,1))").unwrap();
        f.handler
            .handle_line(r#"E(0,100,ParametersSnapshot({"parameters":{"gun.damage":{"baseValue":7,"effects":[]}}}))"#)
            .unwrap();

        let damage = f
            .handler
            .logic()
            .log()
            .parameters()
            .get_value("gun.damage", &PlayerKey::new(1, 1).qualifier())
            .unwrap();
        assert_eq!(damage, 7);
    }

    #[test]
    fn start_and_stop_game() {
        let f = fixture();
        f.handler.handle_line("E(0,100,StartGame(300))").unwrap();
        let log = f.handler.logic().log();
        assert!(log.is_game_started());
        assert_eq!(log.game_time_remaining(), Some(300.0));

        f.clock.advance(10.0);
        f.handler.handle_line("E(0,110,StopGame())").unwrap();
        assert!(!log.is_game_started());
    }

    #[test]
    fn deleted_stops_the_game_and_signals_shutdown() {
        let f = fixture();
        f.handler.handle_line("E(0,100,StartGame(300))").unwrap();
        assert!(!*f.shutdown.borrow());

        f.clock.advance(1.0);
        f.handler.handle_line("E(0,101,Deleted())").unwrap();
        assert!(!f.handler.logic().log().is_game_started());
        assert!(*f.shutdown.borrow());
    }

    #[test]
    fn reset_restores_the_main_player() {
        let f = fixture();
        f.handler
            .handle_line(r#"E(0,100,PlayerSnapshot({"teamID":1,"playerID":1,"ammo":3,"health":1,"gunDamage":1}))"#)
            .unwrap();
        f.clock.advance(1.0);
        f.handler.handle_line("E(0,101,ResetGame())").unwrap();

        let me = f.handler.logic().log().main_player().unwrap();
        assert_eq!(me.ammo, Player::MAX_AMMO);
        assert_eq!(me.health, Player::DEFAULT_HEALTH);
    }

    #[test]
    fn identity_states_follow_the_handshake() {
        let f = fixture();
        let log = f.handler.logic().log();
        assert_eq!(log.client_state(), ClientState::Offline);

        f.handler.connected();
        assert_eq!(log.client_state(), ClientState::Uninitialised);
        f.handler
            .handle_line("E(0,100,StartInitialising())")
            .unwrap();
        assert_eq!(log.client_state(), ClientState::Initialising);
        f.handler.handle_line("E(0,100,TeamPlayer(1,2))").unwrap();
        assert_eq!(log.client_state(), ClientState::Established);

        f.handler.disconnected();
        assert_eq!(log.client_state(), ClientState::Offline);
    }

    #[test]
    fn unknown_body_is_fatal() {
        let f = fixture();
        let err = f.handler.handle_line("E(0,100,Frobnicate())").unwrap_err();
        assert!(err.is_fatal());
        let err = f.handler.handle_line("garbage").unwrap_err();
        assert!(!err.is_fatal());
    }
}
