//! Player values and their wire snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(team, player)` slot identifying a player. Both are 1-based for real players.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerKey {
    pub team: u32,
    pub player: u32,
}

impl PlayerKey {
    pub const fn new(team: u32, player: u32) -> Self {
        Self { team, player }
    }

    /// Qualifier string used to scope parameter effects
    pub fn qualifier(&self) -> String {
        format!("{}/{}", self.team, self.player)
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.team, self.player)
    }
}

/// Per-player counters. Only the server keeps these up to date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub shots_fired: u32,
    pub hits_received: u32,
    pub hits_given: u32,
    pub deaths: u32,
    pub kills: u32,
}

/// A player at one instant.
///
/// Treated as a value: changes build a new `Player` with the `with_*` helpers
/// so a copy taken before a replay compares unequal to the replayed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    #[serde(rename = "teamID")]
    pub team_id: u32,
    #[serde(rename = "playerID")]
    pub player_id: u32,
    pub ammo: i64,
    pub health: i64,
    #[serde(rename = "gunDamage")]
    pub gun_damage: i64,
    #[serde(skip)]
    pub stats: PlayerStats,
}

impl Player {
    pub const MAX_AMMO: i64 = 100;
    pub const DEFAULT_HEALTH: i64 = 5;
    pub const DEFAULT_GUN_DAMAGE: i64 = 1;

    pub fn new(key: PlayerKey) -> Self {
        Self {
            team_id: key.team,
            player_id: key.player,
            ammo: Self::MAX_AMMO,
            health: Self::DEFAULT_HEALTH,
            gun_damage: Self::DEFAULT_GUN_DAMAGE,
            stats: PlayerStats::default(),
        }
    }

    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.team_id, self.player_id)
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn with_ammo(&self, ammo: i64) -> Self {
        Self {
            ammo,
            ..self.clone()
        }
    }

    pub fn with_health(&self, health: i64) -> Self {
        Self {
            health,
            ..self.clone()
        }
    }

    pub fn with_stats(&self, stats: PlayerStats) -> Self {
        Self {
            stats,
            ..self.clone()
        }
    }

    /// Same player in another slot
    pub fn with_key(&self, key: PlayerKey) -> Self {
        Self {
            team_id: key.team,
            player_id: key.player,
            ..self.clone()
        }
    }

    /// Fresh ammo, health, gun and stats in the same slot
    pub fn reset(&self) -> Self {
        Self::new(self.key())
    }

    /// Health after taking `damage`.
    ///
    /// Never goes below zero, and a player already at zero is left alone.
    pub fn after_damage(&self, damage: i64) -> Self {
        if self.health > damage {
            self.with_health(self.health - damage)
        } else if self.health > 0 {
            self.with_health(0)
        } else {
            self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Player(team={}, id={}, ammo={}, health={})",
            self.team_id, self.player_id, self.ammo, self.health
        )
    }
}
