//! Snapshot of everything mutable in a game at one instant

use std::collections::BTreeMap;

use super::error::GameError;
use super::parameters::Parameters;
use super::player::{Player, PlayerKey};

/// Which side of the link the state belongs to.
/// Stats are only kept on the server, main-player logic only runs on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// A client's progress towards owning a player slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientState {
    #[default]
    Offline,
    Uninitialised,
    Initialising,
    Established,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameStats {
    pub team_points: BTreeMap<u32, u32>,
}

/// Highest player slot handed out by `create_new_player`
pub const MAX_PLAYERS_PER_TEAM: u32 = 32;

pub const DEFAULT_GAME_TIME: f64 = 1200.0;
pub const DEFAULT_TEAM_COUNT: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct MomentaryState {
    players: BTreeMap<PlayerKey, Player>,
    team_count: u32,
    largest_team: u32,
    target_team_count: u32,
    parameters: Parameters,
    stats: GameStats,
    game_started: bool,
    game_end_time: Option<f64>,
    game_time: f64,
    main_player: Option<PlayerKey>,
}

impl Default for MomentaryState {
    fn default() -> Self {
        Self::new(DEFAULT_GAME_TIME, DEFAULT_TEAM_COUNT)
    }
}

impl MomentaryState {
    pub fn new(game_time: f64, target_team_count: u32) -> Self {
        Self {
            players: BTreeMap::new(),
            team_count: 0,
            largest_team: 0,
            target_team_count,
            parameters: Parameters::new(),
            stats: GameStats::default(),
            game_started: false,
            game_end_time: None,
            game_time,
            main_player: None,
        }
    }

    pub fn players(&self) -> &BTreeMap<PlayerKey, Player> {
        &self.players
    }

    pub fn player(&self, key: PlayerKey) -> Option<&Player> {
        self.players.get(&key)
    }

    /// Highest team number with a player in it
    pub fn team_count(&self) -> u32 {
        self.team_count
    }

    /// Highest player number in any team
    pub fn largest_team(&self) -> u32 {
        self.largest_team
    }

    pub fn target_team_count(&self) -> u32 {
        self.target_team_count
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    pub fn is_game_started(&self) -> bool {
        self.game_started
    }

    pub fn game_end_time(&self) -> Option<f64> {
        self.game_end_time
    }

    /// Configured game duration in seconds
    pub fn game_time(&self) -> f64 {
        self.game_time
    }

    pub fn main_player_key(&self) -> Option<PlayerKey> {
        self.main_player
    }

    pub fn main_player(&self) -> Option<&Player> {
        self.main_player.and_then(|k| self.players.get(&k))
    }

    // Mutation below is only reachable through the event log.

    pub(crate) fn get_or_create_player(&mut self, key: PlayerKey) -> &Player {
        if !self.players.contains_key(&key) {
            self.team_count = self.team_count.max(key.team);
            self.largest_team = self.largest_team.max(key.player);
        }
        self.players.entry(key).or_insert_with(|| Player::new(key))
    }

    pub(crate) fn put_player(&mut self, player: Player) {
        let key = player.key();
        self.team_count = self.team_count.max(key.team);
        self.largest_team = self.largest_team.max(key.player);
        self.players.insert(key, player);
    }

    pub(crate) fn has_player(&self, key: PlayerKey) -> bool {
        self.players.contains_key(&key)
    }

    /// First free slot, filling every team's player 1 before any player 2
    pub(crate) fn free_slot(&self) -> Result<PlayerKey, GameError> {
        (1..=MAX_PLAYERS_PER_TEAM)
            .flat_map(|player| (1..=self.target_team_count).map(move |team| PlayerKey::new(team, player)))
            .find(|key| !self.players.contains_key(key))
            .ok_or(GameError::TooManyPlayers)
    }

    /// Move a player between slots. `Ok(None)` when there is nobody at `src`.
    pub(crate) fn move_player(
        &mut self,
        src: PlayerKey,
        dst: PlayerKey,
    ) -> Result<Option<Player>, GameError> {
        if self.players.contains_key(&dst) {
            return Err(GameError::SlotOccupied(dst));
        }
        let Some(player) = self.players.remove(&src) else {
            return Ok(None);
        };

        let moved = player.with_key(dst);
        self.put_player(moved.clone());
        if self.main_player == Some(src) {
            self.main_player = Some(dst);
        }
        self.vacated(src);
        Ok(Some(moved))
    }

    pub(crate) fn delete_player(&mut self, key: PlayerKey) -> Option<Player> {
        let removed = self.players.remove(&key)?;
        self.vacated(key);
        Some(removed)
    }

    /// The counts only shrink when the highest slot is emptied
    fn vacated(&mut self, key: PlayerKey) {
        if key.team == self.team_count {
            self.team_count = self.players.keys().map(|k| k.team).max().unwrap_or(0);
        }
        if key.player == self.largest_team {
            self.largest_team = self.players.keys().map(|k| k.player).max().unwrap_or(0);
        }
    }

    pub(crate) fn set_target_team_count(&mut self, count: u32) {
        self.target_team_count = count;
    }

    pub(crate) fn set_game_time(&mut self, secs: f64) {
        self.game_time = secs;
    }

    pub(crate) fn start_game(&mut self, end_time: f64) {
        self.game_started = true;
        self.game_end_time = Some(end_time);
    }

    pub(crate) fn end_game(&mut self) {
        self.game_started = false;
        self.game_end_time = None;
    }

    pub(crate) fn reset_players(&mut self) {
        for player in self.players.values_mut() {
            *player = player.reset();
        }
        self.stats.team_points.clear();
    }

    pub(crate) fn award_point(&mut self, team: u32) {
        *self.stats.team_points.entry(team).or_default() += 1;
    }

    pub(crate) fn set_main_player(&mut self, player: Player) {
        let key = player.key();
        self.put_player(player);
        self.main_player = Some(key);
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }
}
