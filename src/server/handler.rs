//! Inbound message handling on the server

use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::connection::ServerConnection;
use super::registry::ConnectionRegistry;
use crate::error::LinkError;
use crate::game::{GameLogic, Player, PlayerKey};
use crate::protocol::message::{
    FULL_AMMO, HELLO, HIT, INIT_HIT, PARAMETERS_SNAPSHOT, PING, PLAYER_SNAPSHOT, PONG, RECV,
    START_GAME, TRIGGER, TRIGGER_RELEASE,
};
use crate::protocol::{Captures, Dispatcher, Envelope, Outcome, ProtocolError};

/// Everything a handler needs to know about the line being handled
struct Inbound {
    logic: GameLogic,
    registry: Arc<ConnectionRegistry>,
    conn: Arc<ServerConnection>,
    sender_id: u64,
    time: f64,
    recv: PlayerKey,
}

impl Inbound {
    fn server_time(&self) -> f64 {
        self.conn.client_time_to_server(self.time)
    }
}

type Handlers = Dispatcher<Inbound, LinkError>;

fn messages() -> &'static Handlers {
    static MESSAGES: OnceLock<Handlers> = OnceLock::new();
    MESSAGES.get_or_init(|| {
        Dispatcher::new()
            .on(&RECV, recv)
            .on(&HELLO, hello)
            .on(&PING, ping)
            .on(&PONG, pong)
    })
}

/// Sub-messages a gun reports inside `Recv(team,player,...)`
fn gun_messages() -> &'static Handlers {
    static GUN: OnceLock<Handlers> = OnceLock::new();
    GUN.get_or_init(|| {
        Dispatcher::new()
            .on(&HIT, hit)
            .on(&INIT_HIT, init_hit)
            .on(&TRIGGER, trigger)
            .on(&TRIGGER_RELEASE, trigger_release)
            .on(&FULL_AMMO, full_ammo)
    })
}

/// Handles lines from every client. One instance serves all connections.
#[derive(Clone)]
pub struct ServerMsgHandler {
    logic: GameLogic,
    registry: Arc<ConnectionRegistry>,
}

impl ServerMsgHandler {
    pub fn new(logic: GameLogic, registry: Arc<ConnectionRegistry>) -> Self {
        Self { logic, registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one line from `conn`. Returns the envelope time.
    pub fn handle_line(&self, conn: &Arc<ServerConnection>, line: &str) -> Result<f64, LinkError> {
        let envelope = Envelope::parse(line)?;
        debug!(
            connection = conn.id(),
            sender = %format!("{:x}", envelope.sender_id),
            time = envelope.time,
            body = %envelope.body,
            "Received"
        );

        let mut inbound = Inbound {
            logic: self.logic.clone(),
            registry: Arc::clone(&self.registry),
            conn: Arc::clone(conn),
            sender_id: envelope.sender_id,
            time: envelope.time,
            recv: PlayerKey::default(),
        };
        if !messages().dispatch(&mut inbound, &envelope.body)?.is_handled() {
            return Err(LinkError::UnknownMessage(envelope.body));
        }

        conn.touch(envelope.time);
        self.registry.consider_moving_confidence_point(envelope.time)?;
        Ok(envelope.time)
    }
}

/// Hand `player` to `conn`: snapshots first, then the game clock if one is running
pub fn finish_initialisation(
    registry: &ConnectionRegistry,
    conn: &Arc<ServerConnection>,
    player: &Player,
) -> Result<(), LinkError> {
    let log = registry.log();

    let player_json = player.to_json().map_err(ProtocolError::from)?;
    conn.queue_message(PLAYER_SNAPSHOT.create(&[&player_json])?);
    let parameters = log.with_current_state(|s| s.parameters().to_simple_types());
    conn.queue_message(PARAMETERS_SNAPSHOT.create(&[&parameters])?);

    registry.establish(conn, player.key());

    if log.is_game_started() {
        let remaining = log.game_time_remaining().unwrap_or(0.0).max(0.0) as i64;
        conn.queue_message(START_GAME.create(&[&remaining])?);
    }
    Ok(())
}

fn recv(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    inbound.recv = PlayerKey::new(caps.uint(0)?, caps.uint(1)?);
    gun_messages().dispatch(inbound, caps.str(2)?)
}

fn hit(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let sent = PlayerKey::new(caps.uint(0)?, caps.uint(1)?);
    let damage = caps.int(2)?;
    inbound
        .logic
        .hit(inbound.server_time(), inbound.recv, sent, damage)?;
    Ok(Outcome::Handled)
}

/// A shot from a gun which is initialising, not a real hit
fn init_hit(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    let Some(target) = inbound.registry.initialising() else {
        warn!(shooter = %inbound.recv, "InitHit with nobody initialising");
        return Ok(Outcome::Handled);
    };
    let player = inbound.logic.log().create_new_player()?;
    finish_initialisation(&inbound.registry, &target, &player)?;
    Ok(Outcome::Handled)
}

fn trigger(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound.logic.trigger(inbound.server_time(), inbound.recv)?;
    Ok(Outcome::Handled)
}

fn trigger_release(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound
        .logic
        .trigger_release(inbound.server_time(), inbound.recv)?;
    Ok(Outcome::Handled)
}

fn full_ammo(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound.logic.full_ammo(inbound.server_time(), inbound.recv)?;
    Ok(Outcome::Handled)
}

fn hello(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    let existing = inbound.registry.is_connected(inbound.sender_id);
    inbound.registry.received_hello(&inbound.conn, inbound.sender_id);
    if let Some(key) = existing {
        debug!(player = %key, "Known client reconnected");
        let player = inbound.logic.log().get_or_create_player(key);
        finish_initialisation(&inbound.registry, &inbound.conn, &player)?;
    }
    Ok(Outcome::Handled)
}

fn ping(inbound: &mut Inbound, _: &Captures) -> Result<Outcome, LinkError> {
    inbound
        .conn
        .queue_message(PONG.create(&[&inbound.time, &1])?);
    Ok(Outcome::Handled)
}

fn pong(inbound: &mut Inbound, caps: &Captures) -> Result<Outcome, LinkError> {
    let now = inbound.logic.log().now();
    inbound.conn.record_pong(now, caps.float(0)?, inbound.time);
    if caps.int(1)? != 0 {
        inbound
            .conn
            .queue_message(PONG.create(&[&inbound.time, &0])?);
    }
    Ok(Outcome::Handled)
}
