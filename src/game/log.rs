//! The event log: reconciles events which arrive out of order
//!
//! Server time is split three ways:
//!
//! ```text
//! [baseline] -- confidence point -- uncertain events (sorted) -- now -- future events
//! ```
//!
//! `baseline` is the result of every event before the confidence point, and
//! those events are forgotten. Uncertain events have happened but an earlier
//! event may still turn up, in which case `current` is rebuilt by replaying them
//! on a copy of `baseline`. Future events wait for a timer.
//!
//! Every operation runs under one reentrant lock. Notifications raised while
//! the state is being changed are queued and delivered after the change is
//! complete, still under the lock, so listeners see a consistent state and may
//! call back into the log.

use parking_lot::{ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::error::GameError;
use super::events::{ApplyContext, Event};
use super::notify::{Notification, Notifier, StateListener};
use super::parameters::Parameters;
use super::player::{Player, PlayerKey};
use super::state::{ClientState, MomentaryState, Role};
use crate::util::time::Clock;
use crate::util::timer::{Scheduler, TimerHandle};

struct LogState {
    current: MomentaryState,
    baseline: MomentaryState,
    confidence_point: f64,
    uncertain: Vec<Event>,
    future: Vec<Event>,
    timer: Option<TimerHandle>,
    client_state: ClientState,
    notifier: Notifier,
    next_id: u64,
}

struct Shared {
    role: Role,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    state: ReentrantMutex<RefCell<LogState>>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
}

/// Handle to the event log shared by every connection of a game
#[derive(Clone)]
pub struct EventLog {
    shared: Arc<Shared>,
}

impl EventLog {
    pub fn new(role: Role, clock: Arc<dyn Clock>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_state(role, clock, scheduler, MomentaryState::default())
    }

    /// Start from `initial` as both baseline and current state
    pub fn with_state(
        role: Role,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        initial: MomentaryState,
    ) -> Self {
        let state = LogState {
            current: initial.clone(),
            baseline: initial,
            confidence_point: 0.0,
            uncertain: Vec::new(),
            future: Vec::new(),
            timer: None,
            client_state: ClientState::Offline,
            notifier: Notifier::new(),
            next_id: 0,
        };
        Self {
            shared: Arc::new(Shared {
                role,
                clock,
                scheduler,
                state: ReentrantMutex::new(RefCell::new(state)),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    /// Listeners are not told about the intermediate states of a replay
    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.shared.listeners.write().push(listener);
    }

    /// Run `op` on the state, then deliver whatever it queued
    fn mutate<R>(&self, op: impl FnOnce(&Arc<Shared>, &mut LogState) -> R) -> R {
        let guard = self.shared.state.lock();
        let (result, pending) = {
            let mut state = guard.borrow_mut();
            let result = op(&self.shared, &mut state);
            (result, state.notifier.take())
        };
        self.shared.deliver(pending);
        result
    }

    fn read<R>(&self, op: impl FnOnce(&LogState) -> R) -> R {
        let guard = self.shared.state.lock();
        let state = guard.borrow();
        op(&state)
    }

    // Events

    /// Submit an event. Past events are applied now, future ones when due.
    pub fn add_event(&self, event: Event) -> Result<(), GameError> {
        self.mutate(|shared, state| state.add_event(shared, event))
    }

    /// Remove every uncertain or future event matching `predicate`.
    /// Returns how many were removed.
    pub fn cancel_events(&self, predicate: impl Fn(&Event) -> bool) -> Result<usize, GameError> {
        self.mutate(|shared, state| state.cancel_events(shared, predicate))
    }

    /// Declare that no event before `point` will ever arrive
    pub fn adjust_confidence_point(&self, point: f64) -> Result<(), GameError> {
        self.mutate(|shared, state| state.adjust_confidence_point(shared, point))
    }

    /// Apply overdue future events and re-arm the timer for the next one
    pub fn recheck_timer(&self) {
        self.mutate(|shared, state| state.recheck_timer(shared))
    }

    fn handle_timer(&self, event_id: u64) {
        self.mutate(|shared, state| {
            let now = shared.clock.now();
            match state.future.iter().position(|e| e.id() == Some(event_id)) {
                Some(index) if state.future[index].server_time <= now => {
                    let event = state.future.remove(index);
                    trace!(event_id, server_time = event.server_time, "Future event due");
                    if let Err(e) = state.add_event(shared, event) {
                        error!(error = %e, event_id, "Failed to apply due event");
                    }
                }
                Some(_) => debug!(event_id, "Timer woke us before the event was due"),
                None => trace!(event_id, "Timer fired for a cancelled event"),
            }
            state.recheck_timer(shared);
        })
    }

    // Reads

    /// Run `f` against the current state.
    /// Don't hold on to anything borrowed from it.
    pub fn with_current_state<R>(&self, f: impl FnOnce(&MomentaryState) -> R) -> R {
        self.read(|state| f(&state.current))
    }

    pub fn with_baseline_state<R>(&self, f: impl FnOnce(&MomentaryState) -> R) -> R {
        self.read(|state| f(&state.baseline))
    }

    pub fn confidence_point(&self) -> f64 {
        self.read(|state| state.confidence_point)
    }

    pub fn uncertain_events(&self) -> Vec<Event> {
        self.read(|state| state.uncertain.clone())
    }

    pub fn future_events(&self) -> Vec<Event> {
        self.read(|state| state.future.clone())
    }

    pub fn is_game_started(&self) -> bool {
        self.with_current_state(MomentaryState::is_game_started)
    }

    /// Seconds until the running game ends
    pub fn game_time_remaining(&self) -> Option<f64> {
        let now = self.now();
        self.with_current_state(|s| s.game_end_time().map(|end| end - now))
    }

    pub fn player(&self, key: PlayerKey) -> Option<Player> {
        self.with_current_state(|s| s.player(key).cloned())
    }

    pub fn main_player(&self) -> Option<Player> {
        self.with_current_state(|s| s.main_player().cloned())
    }

    pub fn parameters(&self) -> Parameters {
        self.with_current_state(|s| s.parameters().clone())
    }

    // Administrative changes. These are not events: they land in both the
    // baseline and the current state so a replay keeps them.

    pub fn get_or_create_player(&self, key: PlayerKey) -> Player {
        self.mutate(|_, state| {
            state.baseline.get_or_create_player(key);
            state.current.get_or_create_player(key).clone()
        })
    }

    pub fn create_new_player(&self) -> Result<Player, GameError> {
        self.mutate(|_, state| {
            let key = state.current.free_slot()?;
            state.baseline.get_or_create_player(key);
            let player = state.current.get_or_create_player(key).clone();
            info!(player = %key, "Created player");
            state.notifier.emit(Notification::StateChanged);
            Ok(player)
        })
    }

    pub fn move_player(&self, src: PlayerKey, dst: PlayerKey) -> Result<(), GameError> {
        self.mutate(|_, state| {
            let Some(moved) = state.current.move_player(src, dst)? else {
                return Ok(());
            };
            if let Err(e) = state.baseline.move_player(src, dst) {
                warn!(error = %e, from = %src, to = %dst, "Baseline disagrees about move");
            }
            info!(from = %src, to = %dst, "Moved player");
            state.notifier.emit(Notification::PlayerMoved {
                from: src,
                player: moved,
            });
            state.notifier.emit(Notification::StateChanged);
            Ok(())
        })
    }

    pub fn delete_player(&self, key: PlayerKey) {
        self.mutate(|_, state| {
            if state.current.delete_player(key).is_none() {
                return;
            }
            state.baseline.delete_player(key);
            info!(player = %key, "Deleted player");
            state.notifier.emit(Notification::StateChanged);
        })
    }

    pub fn set_target_team_count(&self, count: u32) {
        self.mutate(|_, state| {
            state.baseline.set_target_team_count(count);
            state.current.set_target_team_count(count);
            state.notifier.emit(Notification::StateChanged);
        })
    }

    pub fn set_game_time(&self, secs: f64) {
        self.mutate(|_, state| {
            state.baseline.set_game_time(secs);
            state.current.set_game_time(secs);
            state.notifier.emit(Notification::StateChanged);
        })
    }

    /// Add a parameter effect. Subscribers of the current parameters hear about it.
    pub fn add_effect(
        &self,
        name: &str,
        qualifier_pattern: &str,
        id: &str,
        value: &str,
    ) -> Result<(), GameError> {
        self.mutate(|_, state| {
            state
                .current
                .parameters_mut()
                .add_effect(name, qualifier_pattern, id, value)?;
            state
                .baseline
                .parameters_mut()
                .insert_effect(name, qualifier_pattern, id, value)?;
            state.notifier.emit(Notification::StateChanged);
            Ok(())
        })
    }

    pub fn remove_effect(&self, name: &str, id: &str) -> Result<(), GameError> {
        self.mutate(|_, state| {
            state.current.parameters_mut().remove_effect(name, id)?;
            if let Err(e) = state.baseline.parameters_mut().take_effect(name, id) {
                warn!(error = %e, "Baseline has no such effect");
            }
            state.notifier.emit(Notification::StateChanged);
            Ok(())
        })
    }

    /// Subscribe to parameter changes of the current state and every state
    /// replayed from the baseline.
    ///
    /// The callback runs while the log is mid-change and must not call back into it.
    pub fn subscribe_parameters(
        &self,
        name_pattern: &str,
        qualifier_pattern: &str,
        callback: impl Fn(&str) + Send + Sync + Clone + 'static,
    ) {
        self.mutate(|_, state| {
            state
                .baseline
                .parameters_mut()
                .subscribe(name_pattern, qualifier_pattern, callback.clone());
            state
                .current
                .parameters_mut()
                .subscribe(name_pattern, qualifier_pattern, callback);
        })
    }

    // Client identity

    pub fn client_state(&self) -> ClientState {
        self.read(|state| state.client_state)
    }

    pub fn set_client_state(&self, next: ClientState) {
        self.mutate(|_, state| {
            let prev = std::mem::replace(&mut state.client_state, next);
            if prev == next {
                return;
            }
            debug!(from = ?prev, to = ?next, "Client state changed");
            match next {
                ClientState::Initialising => state.notifier.emit(Notification::PlayerInitialising),
                ClientState::Established => state.notifier.emit(Notification::PlayerInitialised),
                _ => {}
            }
            state.notifier.emit(Notification::StateChanged);
        })
    }

    /// Tell listeners about something that happened outside the log
    pub fn notify(&self, notification: Notification) {
        self.mutate(|_, state| state.notifier.emit(notification))
    }

    pub fn notify_connections_changed(&self) {
        self.notify(Notification::ConnectionsChanged)
    }
}

impl Shared {
    fn deliver(&self, pending: Vec<Notification>) {
        if pending.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for n in &pending {
            for listener in &listeners {
                n.deliver(listener.as_ref());
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, event_id: u64, after: f64) -> TimerHandle {
        let after = Duration::try_from_secs_f64(after.max(0.0)).unwrap_or(Duration::MAX);
        let weak: Weak<Shared> = Arc::downgrade(self);
        self.scheduler.schedule(
            after,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    EventLog { shared }.handle_timer(event_id);
                }
            }),
        )
    }
}

impl LogState {
    fn apply_context(&mut self, role: Role) -> (ApplyContext<'_>, &mut Vec<Event>) {
        (
            ApplyContext {
                state: &mut self.current,
                role,
                client_state: self.client_state,
                notifier: &mut self.notifier,
            },
            &mut self.uncertain,
        )
    }

    fn add_event(&mut self, shared: &Arc<Shared>, mut event: Event) -> Result<(), GameError> {
        event.assign_id(&mut self.next_id);
        if event.server_time > shared.clock.now() {
            trace!(server_time = event.server_time, "Future event queued");
            self.future.push(event);
            self.recheck_timer(shared);
            Ok(())
        } else {
            self.add_past_event(shared, event)
        }
    }

    fn add_past_event(&mut self, shared: &Arc<Shared>, event: Event) -> Result<(), GameError> {
        if event.server_time < self.confidence_point {
            return Err(GameError::ConfidenceViolation {
                event_time: event.server_time,
                confidence_point: self.confidence_point,
            });
        }

        let in_order = self
            .uncertain
            .last()
            .map_or(true, |last| event.server_time >= last.server_time);

        if in_order {
            self.uncertain.push(event);
            let (mut ctx, uncertain) = self.apply_context(shared.role);
            let follow_up = uncertain.last_mut().and_then(|e| e.apply(&mut ctx));
            if let Some(next) = follow_up {
                self.add_event(shared, next)?;
            }
        } else {
            let index = self
                .uncertain
                .partition_point(|e| e.server_time <= event.server_time);
            debug!(
                server_time = event.server_time,
                index,
                uncertain = self.uncertain.len(),
                "Out of order event, replaying"
            );
            self.uncertain.insert(index, event);

            // Treat it as the latest event first, then replay to see what changed.
            // The trial runs on a copy so the stored event keeps its one-shot
            // flags, and only the replay gets to produce follow-ups.
            let mut trial = self.uncertain[index].clone();
            let (mut ctx, _) = self.apply_context(shared.role);
            let _ = trial.apply(&mut ctx);
            for next in self.reapply(shared) {
                self.add_event(shared, next)?;
            }
        }

        self.notifier.emit(Notification::StateChanged);
        Ok(())
    }

    /// Rebuild `current` from `baseline` and every uncertain event, then report
    /// players whose values changed. Returns follow-ups for the caller to submit.
    fn reapply(&mut self, shared: &Arc<Shared>) -> Vec<Event> {
        let mut replayed = self.baseline.clone();
        let mut follow_ups = Vec::new();
        {
            let mut muted = self.notifier.mute();
            for event in self.uncertain.iter_mut() {
                let mut ctx = ApplyContext {
                    state: &mut replayed,
                    role: shared.role,
                    client_state: self.client_state,
                    notifier: &mut muted,
                };
                follow_ups.extend(event.apply(&mut ctx));
            }
        }

        let previous = std::mem::replace(&mut self.current, replayed);
        for (key, before) in previous.players() {
            let after = self.current.get_or_create_player(*key);
            if before != after {
                debug!(player = %key, before = %before, after = %after, "Player adjusted by replay");
                let player = after.clone();
                self.notifier
                    .emit(Notification::PlayerAdjusted { key: *key, player });
            }
        }
        follow_ups
    }

    fn cancel_events(
        &mut self,
        shared: &Arc<Shared>,
        predicate: impl Fn(&Event) -> bool,
    ) -> Result<usize, GameError> {
        let uncertain_before = self.uncertain.len();
        self.uncertain.retain(|e| !predicate(e));
        let cancelled_uncertain = uncertain_before - self.uncertain.len();

        let future_before = self.future.len();
        self.future.retain(|e| !predicate(e));
        let cancelled_future = future_before - self.future.len();

        if cancelled_uncertain + cancelled_future > 0 {
            debug!(cancelled_uncertain, cancelled_future, "Cancelled events");
        }
        if cancelled_future > 0 {
            self.recheck_timer(shared);
        }
        if cancelled_uncertain > 0 {
            for next in self.reapply(shared) {
                self.add_event(shared, next)?;
            }
        }
        Ok(cancelled_uncertain + cancelled_future)
    }

    fn adjust_confidence_point(&mut self, shared: &Arc<Shared>, point: f64) -> Result<(), GameError> {
        if point < self.confidence_point {
            return Err(GameError::ConfidenceRegression {
                requested: point,
                current: self.confidence_point,
            });
        }
        if point == self.confidence_point {
            return Ok(());
        }

        match self.uncertain.last() {
            None => {}
            Some(last) if point >= last.server_time => {
                self.baseline = self.current.clone();
                self.uncertain.clear();
            }
            Some(_) => {
                // Fold the certain prefix into the baseline. Its follow-ups
                // were submitted when the events were first applied.
                let split = self.uncertain.partition_point(|e| e.server_time <= point);
                let mut muted = self.notifier.mute();
                for event in &mut self.uncertain[..split] {
                    let mut ctx = ApplyContext {
                        state: &mut self.baseline,
                        role: shared.role,
                        client_state: self.client_state,
                        notifier: &mut muted,
                    };
                    let _ = event.apply(&mut ctx);
                }
                drop(muted);
                self.uncertain.drain(..split);
            }
        }

        trace!(from = self.confidence_point, to = point, "Confidence point moved");
        self.confidence_point = point;
        self.recheck_timer(shared);
        Ok(())
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn recheck_timer(&mut self, shared: &Arc<Shared>) {
        self.cancel_timer();

        let now = shared.clock.now();
        let (mut due, pending): (Vec<Event>, Vec<Event>) = std::mem::take(&mut self.future)
            .into_iter()
            .partition(|e| e.server_time <= now);
        self.future = pending;

        due.sort_by(|a, b| a.server_time.total_cmp(&b.server_time));
        for event in due {
            if let Err(e) = self.add_event(shared, event) {
                error!(error = %e, "Dropping overdue future event");
            }
        }

        // Applying overdue events may have armed a timer of its own
        self.cancel_timer();
        let next = self
            .future
            .iter()
            .min_by(|a, b| a.server_time.total_cmp(&b.server_time));
        if let Some(next) = next {
            let Some(event_id) = next.id() else {
                return;
            };
            let after = next.server_time - now;
            trace!(event_id, after, "Arming future event timer");
            self.timer = Some(shared.arm_timer(event_id, after));
        }
    }
}
