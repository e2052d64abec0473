//! Live client connections and the player slots they own

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::connection::{ConnectionId, ServerConnection};
use crate::game::{EventLog, GameError, Notification, PlayerKey};
use crate::protocol::message::{DELETED, START_INITIALISING, TEAM_PLAYER};

/// Every connection goes through three stages: connected, uninitialised after
/// an unknown `Hello()`, and established once it owns a player slot. At most
/// one connection is initialising at a time.
///
/// Never call into the event log while holding a map guard: the log's
/// listeners call back in here.
pub struct ConnectionRegistry {
    log: EventLog,
    out_of_contact_window: f64,
    connected: DashMap<ConnectionId, Arc<ServerConnection>>,
    established: DashMap<PlayerKey, Arc<ServerConnection>>,
    clients: DashMap<u64, PlayerKey>,
    uninitialised: DashMap<ConnectionId, Arc<ServerConnection>>,
    initialising: Mutex<Option<Arc<ServerConnection>>>,
    flagged: DashSet<PlayerKey>,
}

impl ConnectionRegistry {
    pub fn new(log: EventLog, out_of_contact_window: f64) -> Self {
        Self {
            log,
            out_of_contact_window,
            connected: DashMap::new(),
            established: DashMap::new(),
            clients: DashMap::new(),
            uninitialised: DashMap::new(),
            initialising: Mutex::new(None),
            flagged: DashSet::new(),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// A socket was accepted
    pub fn register(&self, conn: Arc<ServerConnection>) {
        debug!(connection = conn.id(), "Connection registered");
        self.connected.insert(conn.id(), conn);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ServerConnection>> {
        self.connected.get(&id).map(|c| Arc::clone(c.value()))
    }

    pub fn connections(&self) -> Vec<Arc<ServerConnection>> {
        self.connected.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connected.len()
    }

    /// The slot a client id held before, if any
    pub fn is_connected(&self, client_id: u64) -> Option<PlayerKey> {
        self.clients.get(&client_id).map(|k| *k)
    }

    /// Record the client id from `Hello()`. Unknown clients wait to be initialised.
    pub fn received_hello(&self, conn: &Arc<ServerConnection>, client_id: u64) {
        conn.set_client_id(client_id);
        if self.is_connected(client_id).is_none() {
            info!(connection = conn.id(), client_id = %format!("{client_id:x}"), "New client waiting for a player");
            self.uninitialised.insert(conn.id(), Arc::clone(conn));
            self.log.notify_connections_changed();
        }
    }

    pub fn uninitialised(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.uninitialised.iter().map(|c| *c.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn initialising(&self) -> Option<Arc<ServerConnection>> {
        self.initialising.lock().clone()
    }

    /// Ask an uninitialised connection to pick up a player. The next `InitHit`
    /// from any gun gives it one.
    pub fn start_initialising(&self, id: ConnectionId) -> bool {
        let Some((_, conn)) = self.uninitialised.remove(&id) else {
            warn!(connection = id, "Not an uninitialised connection");
            return false;
        };
        {
            let mut initialising = self.initialising.lock();
            if let Some(previous) = initialising.replace(Arc::clone(&conn)) {
                warn!(connection = previous.id(), "Abandoning previous initialisation");
                self.uninitialised.insert(previous.id(), previous);
            }
        }
        info!(connection = id, "Initialising connection");
        match START_INITIALISING.create(&[]) {
            Ok(body) => conn.queue_message(body),
            Err(e) => warn!(error = %e, "Couldn't build StartInitialising"),
        }
        self.log.notify(Notification::PlayerInitialising);
        true
    }

    /// Register that `conn` now owns slot `key`
    pub fn establish(&self, conn: &Arc<ServerConnection>, key: PlayerKey) {
        self.uninitialised.remove(&conn.id());
        {
            let mut initialising = self.initialising.lock();
            if initialising.as_ref().is_some_and(|c| c.id() == conn.id()) {
                *initialising = None;
            }
        }
        self.established.insert(key, Arc::clone(conn));
        if let Some(client_id) = conn.client_id() {
            self.clients.insert(client_id, key);
        }
        info!(connection = conn.id(), player = %key, "Connection established");
        self.log.notify(Notification::PlayerInitialised);
        self.log.notify_connections_changed();
    }

    pub fn established(&self) -> Vec<PlayerKey> {
        let mut keys: Vec<_> = self.established.iter().map(|c| *c.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn connection_for(&self, key: PlayerKey) -> Option<Arc<ServerConnection>> {
        self.established.get(&key).map(|c| Arc::clone(c.value()))
    }

    /// Forget a connection whose socket went away. Its client id keeps its slot
    /// so a reconnect picks it up again.
    pub fn lost_connection(&self, conn: &ServerConnection) {
        let id = conn.id();
        self.connected.remove(&id);
        self.uninitialised.remove(&id);
        {
            let mut initialising = self.initialising.lock();
            if initialising.as_ref().is_some_and(|c| c.id() == id) {
                *initialising = None;
            }
        }
        self.established.retain(|_, c| c.id() != id);
        conn.disconnected();
        info!(connection = id, "Connection lost");
        self.log.notify_connections_changed();
    }

    pub fn queue_message_to_all(&self, body: &str) {
        for conn in self.established.iter() {
            conn.queue_message(body);
        }
    }

    pub fn queue_message(&self, key: PlayerKey, body: &str) {
        match self.established.get(&key) {
            Some(conn) => conn.queue_message(body),
            None => debug!(player = %key, "No connection for player"),
        }
    }

    /// Follow a player to a new slot and tell its gun
    pub fn move_player(&self, src: PlayerKey, dst: PlayerKey) {
        let Some((_, conn)) = self.established.remove(&src) else {
            return;
        };
        self.established.insert(dst, Arc::clone(&conn));
        if let Some(client_id) = conn.client_id() {
            self.clients.insert(client_id, dst);
        }
        if self.flagged.remove(&src).is_some() {
            self.flagged.insert(dst);
        }
        match TEAM_PLAYER.create(&[&dst.team, &dst.player]) {
            Ok(body) => conn.queue_message(body),
            Err(e) => warn!(error = %e, "Couldn't build TeamPlayer"),
        }
    }

    /// Tell the player's gun it was deleted and forget its client id
    pub fn delete_player(&self, key: PlayerKey) {
        if let Some((_, conn)) = self.established.remove(&key) {
            match DELETED.create(&[]) {
                Ok(body) => conn.queue_message(body),
                Err(e) => warn!(error = %e, "Couldn't build Deleted"),
            }
        }
        self.clients.retain(|_, k| *k != key);
        self.flagged.remove(&key);
    }

    /// A message stamped `changed_time` just arrived. If that was the
    /// connection we heard from least recently, history up to the new earliest
    /// contact is complete.
    pub fn consider_moving_confidence_point(&self, changed_time: f64) -> Result<(), GameError> {
        let earliest = self
            .established
            .iter()
            .map(|c| c.last_contact())
            .min_by(f64::total_cmp);
        let Some(earliest) = earliest else {
            return Ok(());
        };
        if earliest == changed_time && earliest > self.log.confidence_point() {
            self.log.adjust_confidence_point(earliest)?;
        }
        Ok(())
    }

    /// Flag established connections we haven't heard from in a while, and
    /// unflag those which came back. Returns the changes.
    pub fn scan_out_of_contact(&self, now: f64) -> Vec<(PlayerKey, bool)> {
        let mut changes: Vec<(PlayerKey, bool)> = self
            .established
            .iter()
            .filter_map(|c| {
                let key = *c.key();
                let silent = c.is_out_of_contact(now, self.out_of_contact_window);
                (silent != self.flagged.contains(&key)).then_some((key, silent))
            })
            .collect();
        changes.sort_unstable_by_key(|(key, _)| *key);

        for (key, silent) in &changes {
            if *silent {
                warn!(player = %key, "Player out of contact");
                self.flagged.insert(*key);
            } else {
                info!(player = %key, "Player back in contact");
                self.flagged.remove(key);
            }
        }
        if !changes.is_empty() {
            self.log.notify_connections_changed();
        }
        changes
    }

    pub fn is_out_of_contact(&self, key: PlayerKey) -> bool {
        self.flagged.contains(&key)
    }
}
