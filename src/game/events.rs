//! Events: timestamped state transitions applied by the event log
//!
//! `apply` only touches the state it is handed and returns at most one
//! follow-up event. The log is responsible for submitting the follow-up.

use tracing::{debug, trace};

use super::notify::{Notification, Notifier};
use super::parameters::Parameters;
use super::player::{Player, PlayerKey};
use super::state::{ClientState, MomentaryState, Role};

/// Everything an event may look at or change while being applied
pub struct ApplyContext<'a> {
    pub state: &'a mut MomentaryState,
    pub role: Role,
    pub client_state: ClientState,
    pub notifier: &'a mut Notifier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A `duration` of zero means the configured game time
    GameStarted { duration: f64, created_next: bool },
    GameEnded,
    /// Trigger pulled. Repeats every `repeat_rate` seconds until cancelled.
    Fire {
        recv: PlayerKey,
        repeat_rate: f64,
        first_application: bool,
    },
    Hit {
        recv: PlayerKey,
        sent: PlayerKey,
        damage: i64,
    },
    FullAmmo { recv: PlayerKey },
    ResetGame,
    SetMainPlayer { player: Player },
    SetParameters { parameters: Parameters },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub server_time: f64,
    pub kind: EventKind,
    id: Option<u64>,
}

impl Event {
    pub fn new(server_time: f64, kind: EventKind) -> Self {
        Self {
            server_time,
            kind,
            id: None,
        }
    }

    pub fn game_started(server_time: f64, duration: f64) -> Self {
        Self::new(
            server_time,
            EventKind::GameStarted {
                duration,
                created_next: false,
            },
        )
    }

    pub fn game_ended(server_time: f64) -> Self {
        Self::new(server_time, EventKind::GameEnded)
    }

    pub fn fire(server_time: f64, recv: PlayerKey, repeat_rate: f64) -> Self {
        Self::new(
            server_time,
            EventKind::Fire {
                recv,
                repeat_rate,
                first_application: true,
            },
        )
    }

    pub fn hit(server_time: f64, recv: PlayerKey, sent: PlayerKey, damage: i64) -> Self {
        Self::new(server_time, EventKind::Hit { recv, sent, damage })
    }

    pub fn full_ammo(server_time: f64, recv: PlayerKey) -> Self {
        Self::new(server_time, EventKind::FullAmmo { recv })
    }

    pub fn reset_game(server_time: f64) -> Self {
        Self::new(server_time, EventKind::ResetGame)
    }

    pub fn set_main_player(server_time: f64, player: Player) -> Self {
        Self::new(server_time, EventKind::SetMainPlayer { player })
    }

    pub fn set_parameters(server_time: f64, parameters: Parameters) -> Self {
        Self::new(server_time, EventKind::SetParameters { parameters })
    }

    /// Identity assigned by the log when the event is submitted
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, next: &mut u64) {
        if self.id.is_none() {
            self.id = Some(*next);
            *next += 1;
        }
    }

    pub fn is_fire(&self) -> bool {
        matches!(self.kind, EventKind::Fire { .. })
    }

    pub fn is_game_ended(&self) -> bool {
        matches!(self.kind, EventKind::GameEnded)
    }

    pub fn apply(&mut self, ctx: &mut ApplyContext<'_>) -> Option<Event> {
        let t = self.server_time;
        match &mut self.kind {
            EventKind::GameStarted {
                duration,
                created_next,
            } => {
                let duration = if *duration == 0.0 {
                    ctx.state.game_time()
                } else {
                    *duration
                };
                let end_time = t + duration;
                ctx.state.start_game(end_time);
                ctx.notifier.emit(Notification::GameStarted);

                if *created_next {
                    None
                } else {
                    *created_next = true;
                    Some(Event::game_ended(end_time))
                }
            }

            EventKind::GameEnded => {
                ctx.state.end_game();
                ctx.notifier.emit(Notification::GameStopped);
                None
            }

            EventKind::Fire {
                recv,
                repeat_rate,
                first_application,
            } => {
                if !ctx.state.is_game_started() {
                    return None;
                }
                let key = acting_player(ctx, *recv)?;
                let Some(player) = ctx.state.player(key) else {
                    return None;
                };
                if player.ammo <= 0 || !player.is_alive() {
                    return None;
                }

                let mut fired = player.with_ammo(player.ammo - 1);
                if ctx.role == Role::Server {
                    fired.stats.shots_fired += 1;
                }
                ctx.state.put_player(fired);
                ctx.notifier.emit(Notification::Fired);

                if *repeat_rate > 0.0 && *first_application {
                    *first_application = false;
                    Some(Event::fire(t + *repeat_rate, *recv, *repeat_rate))
                } else {
                    None
                }
            }

            EventKind::Hit { recv, sent, damage } => {
                apply_hit(ctx, *recv, *sent, *damage);
                None
            }

            EventKind::FullAmmo { recv } => {
                if !ctx.state.is_game_started() {
                    return None;
                }
                let key = acting_player(ctx, *recv)?;
                if let Some(player) = ctx.state.player(key).filter(|p| p.is_alive()) {
                    let refilled = player.with_ammo(Player::MAX_AMMO);
                    ctx.state.put_player(refilled);
                }
                None
            }

            EventKind::ResetGame => {
                ctx.state.reset_players();
                None
            }

            EventKind::SetMainPlayer { player } => {
                if ctx.role == Role::Client {
                    ctx.state.set_main_player(player.clone());
                } else {
                    debug!("Ignoring SetMainPlayer on the server");
                }
                None
            }

            EventKind::SetParameters { parameters } => {
                if ctx.role == Role::Client {
                    ctx.state.parameters_mut().replace_values(parameters.clone());
                } else {
                    debug!("Ignoring SetParameters on the server");
                }
                None
            }
        }
    }
}

/// The player a gun event acts on. The server trusts the reported slot,
/// a client only ever acts as its own established main player.
fn acting_player(ctx: &mut ApplyContext<'_>, recv: PlayerKey) -> Option<PlayerKey> {
    match ctx.role {
        Role::Server => {
            ctx.state.get_or_create_player(recv);
            Some(recv)
        }
        Role::Client if ctx.client_state == ClientState::Established => {
            ctx.state.main_player_key()
        }
        Role::Client => None,
    }
}

fn apply_hit(ctx: &mut ApplyContext<'_>, recv: PlayerKey, sent: PlayerKey, damage: i64) {
    let target_key = match ctx.role {
        Role::Server => {
            ctx.state.get_or_create_player(recv);
            ctx.state.get_or_create_player(sent);
            recv
        }
        Role::Client => match ctx.state.main_player_key() {
            Some(key) => key,
            None => return,
        },
    };

    if !ctx.state.is_game_started() {
        debug!(victim = %target_key, shooter = %sent, "Hit before game started");
        return;
    }
    if target_key == sent {
        trace!(player = %sent, "Ignoring self hit");
        return;
    }

    let Some(target) = ctx.state.player(target_key).cloned() else {
        return;
    };

    if ctx.role == Role::Client {
        ctx.state.put_player(target.after_damage(damage));
        return;
    }

    let Some(shooter) = ctx.state.player(sent).cloned() else {
        return;
    };
    if !shooter.is_alive() {
        trace!(shooter = %sent, "Ignoring hit from a dead player");
        return;
    }

    let mut hit = target.after_damage(damage);
    let mut shooter = shooter;
    hit.stats.hits_received += 1;
    shooter.stats.hits_given += 1;
    if target.is_alive() && !hit.is_alive() {
        hit.stats.deaths += 1;
        shooter.stats.kills += 1;
        ctx.state.award_point(sent.team);
    }
    ctx.state.put_player(hit);
    ctx.state.put_player(shooter);
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PlayerKey = PlayerKey::new(1, 1);
    const B: PlayerKey = PlayerKey::new(2, 1);

    fn apply(event: &mut Event, state: &mut MomentaryState, role: Role) -> Option<Event> {
        let mut notifier = Notifier::new();
        let mut ctx = ApplyContext {
            state,
            role,
            client_state: ClientState::Established,
            notifier: &mut notifier,
        };
        event.apply(&mut ctx)
    }

    fn started() -> MomentaryState {
        let mut state = MomentaryState::default();
        state.start_game(10_000.0);
        state
    }

    #[test]
    fn game_started_schedules_end_once() {
        let mut state = MomentaryState::new(300.0, 2);
        let mut e = Event::game_started(50.0, 0.0);

        let next = apply(&mut e, &mut state, Role::Server).unwrap();
        assert!(next.is_game_ended());
        assert_eq!(next.server_time, 350.0);
        assert_eq!(state.game_end_time(), Some(350.0));

        assert!(apply(&mut e, &mut state, Role::Server).is_none());
        assert!(state.is_game_started());
    }

    #[test]
    fn explicit_duration_wins() {
        let mut state = MomentaryState::new(300.0, 2);
        let mut e = Event::game_started(50.0, 30.0);
        let next = apply(&mut e, &mut state, Role::Server).unwrap();
        assert_eq!(next.server_time, 80.0);
    }

    #[test]
    fn game_ended_clears_state() {
        let mut state = started();
        apply(&mut Event::game_ended(1.0), &mut state, Role::Server);
        assert!(!state.is_game_started());
        assert_eq!(state.game_end_time(), None);
    }

    #[test]
    fn fire_repeats_once_per_instance() {
        let mut state = started();
        let mut e = Event::fire(100.0, A, 20.0);

        let next = apply(&mut e, &mut state, Role::Server).unwrap();
        assert!(next.is_fire());
        assert_eq!(next.server_time, 120.0);
        assert!(apply(&mut e, &mut state, Role::Server).is_none());

        let p = state.player(A).unwrap();
        assert_eq!(p.ammo, Player::MAX_AMMO - 2);
        assert_eq!(p.stats.shots_fired, 2);
    }

    #[test]
    fn fire_without_ammo_or_game_does_nothing() {
        let mut state = MomentaryState::default();
        assert!(apply(&mut Event::fire(1.0, A, 1.0), &mut state, Role::Server).is_none());
        assert_eq!(state.player(A), None);

        let mut state = started();
        let empty = Player::new(A).with_ammo(0);
        state.put_player(empty.clone());
        assert!(apply(&mut Event::fire(1.0, A, 1.0), &mut state, Role::Server).is_none());
        assert_eq!(state.player(A), Some(&empty));
    }

    #[test]
    fn fatal_hit_scores_for_shooter_team() {
        let mut state = started();
        apply(&mut Event::hit(1.0, A, B, 2000), &mut state, Role::Server);

        let target = state.player(A).unwrap();
        assert_eq!(target.health, 0);
        assert_eq!(target.stats.hits_received, 1);
        assert_eq!(target.stats.deaths, 1);
        let shooter = state.player(B).unwrap();
        assert_eq!(shooter.stats.hits_given, 1);
        assert_eq!(shooter.stats.kills, 1);
        assert_eq!(state.stats().team_points.get(&2), Some(&1));
    }

    #[test]
    fn second_lethal_hit_is_not_another_kill() {
        let mut state = started();
        apply(&mut Event::hit(1.0, A, B, 2000), &mut state, Role::Server);
        apply(&mut Event::hit(2.0, A, B, 2000), &mut state, Role::Server);

        let target = state.player(A).unwrap();
        assert_eq!(target.health, 0);
        assert_eq!(target.stats.deaths, 1);
        assert_eq!(state.player(B).unwrap().stats.kills, 1);
        assert_eq!(state.stats().team_points.get(&2), Some(&1));
    }

    #[test]
    fn ignored_hits() {
        // before the game
        let mut state = MomentaryState::default();
        apply(&mut Event::hit(1.0, A, B, 2), &mut state, Role::Server);
        assert_eq!(state.player(A).unwrap().health, Player::DEFAULT_HEALTH);
        assert_eq!(state.player(A).unwrap().stats.hits_received, 0);

        // self hit
        let mut state = started();
        apply(&mut Event::hit(1.0, A, A, 2), &mut state, Role::Server);
        assert_eq!(state.player(A).unwrap().health, Player::DEFAULT_HEALTH);

        // dead shooter
        let mut state = started();
        state.put_player(Player::new(B).with_health(0));
        apply(&mut Event::hit(1.0, A, B, 2), &mut state, Role::Server);
        assert_eq!(state.player(A).unwrap().health, Player::DEFAULT_HEALTH);
        assert_eq!(state.player(A).unwrap().stats.hits_received, 0);
    }

    #[test]
    fn client_acts_on_main_player() {
        let mut state = started();
        state.set_main_player(Player::new(A));

        apply(&mut Event::hit(1.0, B, PlayerKey::new(1, 2), 2), &mut state, Role::Client);
        apply(&mut Event::fire(1.0, PlayerKey::default(), 0.0), &mut state, Role::Client);

        let me = state.player(A).unwrap();
        assert_eq!(me.health, Player::DEFAULT_HEALTH - 2);
        assert_eq!(me.ammo, Player::MAX_AMMO - 1);
        assert_eq!(me.stats, crate::game::player::PlayerStats::default());
        assert_eq!(state.player(B), None);
    }

    #[test]
    fn client_without_identity_cannot_fire() {
        let mut state = started();
        state.set_main_player(Player::new(A));
        let mut notifier = Notifier::new();
        let mut ctx = ApplyContext {
            state: &mut state,
            role: Role::Client,
            client_state: ClientState::Initialising,
            notifier: &mut notifier,
        };
        assert!(Event::fire(1.0, A, 1.0).apply(&mut ctx).is_none());
        assert!(notifier.take().is_empty());
        assert_eq!(state.player(A).unwrap().ammo, Player::MAX_AMMO);
    }

    #[test]
    fn full_ammo_refills_living_players() {
        let mut state = started();
        state.put_player(Player::new(A).with_ammo(3));
        state.put_player(Player::new(B).with_ammo(3).with_health(0));

        apply(&mut Event::full_ammo(1.0, A), &mut state, Role::Server);
        apply(&mut Event::full_ammo(1.0, B), &mut state, Role::Server);
        assert_eq!(state.player(A).unwrap().ammo, Player::MAX_AMMO);
        assert_eq!(state.player(B).unwrap().ammo, 3);
    }

    #[test]
    fn client_only_events_are_ignored_by_server() {
        let mut state = MomentaryState::default();
        apply(
            &mut Event::set_main_player(1.0, Player::new(A)),
            &mut state,
            Role::Server,
        );
        assert_eq!(state.main_player_key(), None);

        let mut params = Parameters::new();
        params.add_effect("gun.damage", "*", "x", "=9").unwrap();
        apply(&mut Event::set_parameters(1.0, params.clone()), &mut state, Role::Server);
        assert_ne!(state.parameters(), &params);

        apply(&mut Event::set_parameters(1.0, params.clone()), &mut state, Role::Client);
        assert_eq!(state.parameters(), &params);
    }

    #[test]
    fn reset_game_restores_players() {
        let mut state = started();
        apply(&mut Event::hit(1.0, A, B, 2000), &mut state, Role::Server);
        apply(&mut Event::reset_game(2.0), &mut state, Role::Server);
        assert_eq!(state.player(A), Some(&Player::new(A)));
        assert!(state.stats().team_points.is_empty());
    }
}
