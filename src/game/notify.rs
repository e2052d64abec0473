//! Change notifications out of the event log
//!
//! Events queue notifications while the log is being mutated. The log delivers
//! them to every [`StateListener`] once the mutation is finished, so listeners
//! are free to read the state or submit more events.

use std::ops::{Deref, DerefMut};

use super::player::{Player, PlayerKey};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged,
    /// A replay changed what we believe about a player
    PlayerAdjusted { key: PlayerKey, player: Player },
    PlayerMoved { from: PlayerKey, player: Player },
    GameStarted,
    GameStopped,
    Fired,
    ConnectionsChanged,
    PlayerInitialising,
    PlayerInitialised,
}

/// Observer of the event log. Every method defaults to doing nothing.
pub trait StateListener: Send + Sync {
    fn state_changed(&self) {}
    fn player_adjusted(&self, _key: PlayerKey, _player: &Player) {}
    fn player_moved(&self, _from: PlayerKey, _player: &Player) {}
    fn game_started(&self) {}
    fn game_stopped(&self) {}
    fn fired(&self) {}
    fn connections_changed(&self) {}
    fn player_initialising(&self) {}
    fn player_initialised(&self) {}
}

impl Notification {
    pub fn deliver(&self, listener: &dyn StateListener) {
        match self {
            Notification::StateChanged => listener.state_changed(),
            Notification::PlayerAdjusted { key, player } => listener.player_adjusted(*key, player),
            Notification::PlayerMoved { from, player } => listener.player_moved(*from, player),
            Notification::GameStarted => listener.game_started(),
            Notification::GameStopped => listener.game_stopped(),
            Notification::Fired => listener.fired(),
            Notification::ConnectionsChanged => listener.connections_changed(),
            Notification::PlayerInitialising => listener.player_initialising(),
            Notification::PlayerInitialised => listener.player_initialised(),
        }
    }
}

/// Queue of notifications waiting for delivery
#[derive(Debug, Default)]
pub struct Notifier {
    queue: Vec<Notification>,
    muted: u32,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `n` unless muted
    pub fn emit(&mut self, n: Notification) {
        if self.muted == 0 {
            self.queue.push(n);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted > 0
    }

    /// Drop everything emitted until the returned guard goes away
    pub fn mute(&mut self) -> Muted<'_> {
        self.muted += 1;
        Muted { notifier: self }
    }

    pub fn take(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.queue)
    }
}

/// Scope during which a [`Notifier`] swallows notifications
pub struct Muted<'a> {
    notifier: &'a mut Notifier,
}

impl Deref for Muted<'_> {
    type Target = Notifier;

    fn deref(&self) -> &Notifier {
        &*self.notifier
    }
}

impl DerefMut for Muted<'_> {
    fn deref_mut(&mut self) -> &mut Notifier {
        &mut *self.notifier
    }
}

impl Drop for Muted<'_> {
    fn drop(&mut self) {
        self.notifier.muted -= 1;
    }
}
