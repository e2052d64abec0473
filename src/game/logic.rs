//! Gameplay verbs, translated into events on the log

use tracing::debug;

use super::error::GameError;
use super::events::{Event, EventKind};
use super::log::EventLog;
use super::parameters::Parameters;
use super::player::{Player, PlayerKey};

#[derive(Clone)]
pub struct GameLogic {
    log: EventLog,
    fire_repeat_rate: f64,
}

impl GameLogic {
    /// `fire_repeat_rate` is the seconds between shots while the trigger is
    /// held. Zero means one shot per pull.
    pub fn new(log: EventLog, fire_repeat_rate: f64) -> Self {
        Self {
            log,
            fire_repeat_rate,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn trigger(&self, server_time: f64, recv: PlayerKey) -> Result<(), GameError> {
        self.log
            .add_event(Event::fire(server_time, recv, self.fire_repeat_rate))
    }

    /// Cancel every shot `recv` would have fired after `server_time`
    pub fn trigger_release(&self, server_time: f64, recv: PlayerKey) -> Result<usize, GameError> {
        let cancelled = self.log.cancel_events(|e| {
            e.server_time > server_time
                && matches!(e.kind, EventKind::Fire { recv: r, .. } if r == recv)
        })?;
        debug!(player = %recv, server_time, cancelled, "Trigger released");
        Ok(cancelled)
    }

    pub fn hit(
        &self,
        server_time: f64,
        recv: PlayerKey,
        sent: PlayerKey,
        damage: i64,
    ) -> Result<(), GameError> {
        self.log.add_event(Event::hit(server_time, recv, sent, damage))
    }

    pub fn full_ammo(&self, server_time: f64, recv: PlayerKey) -> Result<(), GameError> {
        self.log.add_event(Event::full_ammo(server_time, recv))
    }

    /// Zero `duration` uses the configured game time
    pub fn start_game(&self, server_time: f64, duration: f64) -> Result<(), GameError> {
        self.log.add_event(Event::game_started(server_time, duration))
    }

    /// End the game at `server_time`, dropping any later scheduled end
    pub fn stop_game(&self, server_time: f64) -> Result<(), GameError> {
        self.log
            .cancel_events(|e| e.is_game_ended() && e.server_time > server_time)?;
        self.log.add_event(Event::game_ended(server_time))
    }

    pub fn reset_game(&self, server_time: f64) -> Result<(), GameError> {
        self.log.add_event(Event::reset_game(server_time))
    }

    // Client only

    pub fn set_main_player(&self, server_time: f64, player: Player) -> Result<(), GameError> {
        self.log.add_event(Event::set_main_player(server_time, player))
    }

    pub fn set_parameters(&self, server_time: f64, parameters: Parameters) -> Result<(), GameError> {
        self.log
            .add_event(Event::set_parameters(server_time, parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{ClientState, Role};
    use crate::util::time::ManualClock;
    use crate::util::timer::ManualScheduler;
    use std::sync::Arc;

    const A: PlayerKey = PlayerKey::new(1, 1);
    const B: PlayerKey = PlayerKey::new(1, 2);

    fn logic(role: Role, now: f64, repeat: f64) -> GameLogic {
        let log = EventLog::new(
            role,
            Arc::new(ManualClock::new(now)),
            Arc::new(ManualScheduler::new()),
        );
        GameLogic::new(log, repeat)
    }

    fn player(logic: &GameLogic, key: PlayerKey) -> Player {
        logic.log().get_or_create_player(key)
    }

    #[test]
    fn single_shot() {
        let g = logic(Role::Server, 100.0, 0.0);
        g.start_game(50.0, 0.0).unwrap();
        g.trigger(100.0, A).unwrap();

        let p = player(&g, A);
        assert_eq!(p.ammo, Player::MAX_AMMO - 1);
        assert_eq!(p.stats.shots_fired, 1);
    }

    #[test]
    fn held_trigger_keeps_firing() {
        let g = logic(Role::Server, 100.0, 20.0);
        g.start_game(30.0, 0.0).unwrap();
        g.trigger(50.0, A).unwrap();

        // 50, 70 and 90 have happened, 110 is still to come
        let p = player(&g, A);
        assert_eq!(p.ammo, Player::MAX_AMMO - 3);
        assert_eq!(p.stats.shots_fired, 3);
        let future = g.log().future_events();
        assert!(future[1].is_fire());
        assert_eq!(future[1].server_time, 110.0);
    }

    #[test]
    fn release_cancels_later_shots() {
        let g = logic(Role::Server, 100.0, 20.0);
        g.start_game(30.0, 0.0).unwrap();
        g.trigger(50.0, A).unwrap();
        assert_eq!(g.trigger_release(80.0, A).unwrap(), 2);

        let p = player(&g, A);
        assert_eq!(p.ammo, Player::MAX_AMMO - 2);
        assert_eq!(p.stats.shots_fired, 2);
        let future = g.log().future_events();
        assert_eq!(future.len(), 1);
        assert!(future[0].is_game_ended());
    }

    #[test]
    fn release_leaves_other_players_firing() {
        let g = logic(Role::Server, 100.0, 20.0);
        g.start_game(30.0, 0.0).unwrap();
        g.trigger(50.0, A).unwrap();
        g.trigger(50.0, B).unwrap();
        g.trigger_release(60.0, A).unwrap();

        assert_eq!(player(&g, A).ammo, Player::MAX_AMMO - 1);
        assert_eq!(player(&g, B).ammo, Player::MAX_AMMO - 3);
    }

    #[test]
    fn stop_game_replaces_scheduled_end() {
        let g = logic(Role::Server, 100.0, 0.0);
        g.start_game(50.0, 0.0).unwrap();
        g.stop_game(90.0).unwrap();

        assert!(!g.log().is_game_started());
        assert!(g.log().future_events().is_empty());

        g.hit(95.0, A, B, 2).unwrap();
        assert_eq!(player(&g, A).health, Player::DEFAULT_HEALTH);
    }

    #[test]
    fn hit_after_game_end_is_ignored() {
        let clock = Arc::new(ManualClock::new(100.0));
        let log = EventLog::new(Role::Server, clock.clone(), Arc::new(ManualScheduler::new()));
        let g = GameLogic::new(log, 0.0);
        g.start_game(100.0, 0.0).unwrap();

        clock.set(200.0 + 1200.0);
        g.log().recheck_timer();
        g.hit(150.0 + 1200.0, A, B, 2).unwrap();

        let p = player(&g, A);
        assert_eq!(p.health, Player::DEFAULT_HEALTH);
        assert_eq!(p.stats.hits_received, 0);
    }

    #[test]
    fn full_ammo_refills() {
        let g = logic(Role::Server, 100.0, 0.0);
        g.start_game(10.0, 0.0).unwrap();
        g.trigger(20.0, A).unwrap();
        g.trigger(30.0, A).unwrap();
        g.full_ammo(40.0, A).unwrap();
        assert_eq!(player(&g, A).ammo, Player::MAX_AMMO);
    }

    #[test]
    fn reset_restores_health() {
        let g = logic(Role::Server, 100.0, 0.0);
        g.start_game(10.0, 0.0).unwrap();
        g.hit(20.0, A, B, 2000).unwrap();
        g.reset_game(30.0).unwrap();

        assert_eq!(player(&g, A), Player::new(A));
        assert!(g.log().with_current_state(|s| s.stats().team_points.is_empty()));
    }

    fn client(now: f64) -> GameLogic {
        let g = logic(Role::Client, now, 0.0);
        g.log().set_client_state(ClientState::Established);
        g
    }

    #[test]
    fn client_fires_as_main_player() {
        let g = client(100.0);
        g.set_main_player(10.0, Player::new(A)).unwrap();
        g.start_game(50.0, 0.0).unwrap();
        g.trigger(100.0, PlayerKey::default()).unwrap();

        let me = g.log().main_player().unwrap();
        assert_eq!(me.key(), A);
        assert_eq!(me.ammo, Player::MAX_AMMO - 1);
    }

    #[test]
    fn main_player_change_after_hit() {
        let g = client(300.0);
        g.start_game(50.0, 0.0).unwrap();
        g.set_main_player(20.0, Player::new(A)).unwrap();
        g.set_main_player(120.0, Player::new(B)).unwrap();

        g.hit(100.0, A, PlayerKey::new(2, 1), 2).unwrap();
        g.hit(100.0, B, PlayerKey::new(2, 1), 2).unwrap();

        // both hits landed on whoever we were at 100
        assert_eq!(player(&g, A).health, Player::DEFAULT_HEALTH - 4);
        assert_eq!(player(&g, B).health, Player::DEFAULT_HEALTH);
        assert_eq!(g.log().main_player().unwrap().key(), B);
    }

    #[test]
    fn main_player_change_before_hit() {
        let g = client(300.0);
        g.start_game(50.0, 0.0).unwrap();
        g.set_main_player(20.0, Player::new(A)).unwrap();
        g.set_main_player(80.0, Player::new(B)).unwrap();

        g.hit(100.0, A, PlayerKey::new(2, 1), 2).unwrap();
        g.hit(100.0, B, PlayerKey::new(2, 1), 2).unwrap();

        assert_eq!(player(&g, A).health, Player::DEFAULT_HEALTH);
        assert_eq!(player(&g, B).health, Player::DEFAULT_HEALTH - 4);
    }

    #[test]
    fn parameter_snapshot_takes_effect_at_its_time() {
        let g = client(100.0);
        g.start_game(50.0, 0.0).unwrap();
        let before = g
            .log()
            .parameters()
            .get_player_value("maxHealth", A)
            .unwrap();

        let mut snapshot = Parameters::new();
        snapshot
            .add_player_effect("maxHealth", A, "foo-id", "*2")
            .unwrap();
        assert_eq!(
            g.log().parameters().get_player_value("maxHealth", A).unwrap(),
            before
        );

        g.set_parameters(80.0, snapshot).unwrap();
        assert_eq!(
            g.log().parameters().get_player_value("maxHealth", A).unwrap(),
            before * 2
        );
    }
}
