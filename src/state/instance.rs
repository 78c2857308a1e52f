//! Minigame instance state machine.
//!
//! An instance is one isolated play session spawned from a template. It owns
//! its roster, worlds, team assignment, hooks, listener registrations and
//! countdown. Operations that touch the template's pool or world index live on
//! [`MiniGame`](super::minigame::MiniGame).
//!
//! # State Diagram
//!
//! ```text
//! ┌─────────┐ roster ≥ min ┌───────────┐ reaches 0 ┌─────────┐  stop  ┌─────────┐
//! │ Waiting │─────────────▶│ Countdown │──────────▶│ Started │───────▶│ Stopped │
//! └─────────┘              └─────┬─────┘           └─────────┘        └────┬────┘
//!      ▲      roster < min       │                                         │ delete
//!      └─────────────────────────┘                                   ┌─────▼─────┐
//!                                                                    │  Deleted  │
//!                                                                    └───────────┘
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::countdown::{CountdownSetting, CountdownStep, CountdownTask};
use super::error::MiniGameError;
use super::hooks::{HookContext, HookEvent, HookRegistry, PlayerHookEvent};
use super::host::{GameMode, GameModeSpectator, Location, Services, SpectatorMode};
use super::listener::{
    EventKind, HostEvent, Listener, ListenerId, ListenerRegistry, ListenerScope, Priority,
    Subscription, TeleportCause,
};
use super::minigame::{InstanceId, InstanceKey};
use super::player::PlayerId;
use super::settings::{IsolationSetting, TeamSetting, WorldSetting};
use super::task::{TaskId, TaskScheduler};
use super::world::{WorldHandle, WorldSet, WorldSlot};

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceStatus {
    /// Roster open, no countdown
    #[default]
    Waiting,
    /// Countdown running
    Countdown,
    /// Game in progress
    Started,
    /// Stopped, still owned by its template
    Stopped,
    /// Removed from its template; never reused
    Deleted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Countdown => "countdown",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }

    /// Check if new players should be routed here.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Waiting | Self::Countdown)
    }
}

/// Roster bounds copied from the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterLimits {
    pub min: usize,
    pub max: usize,
}

/// One play session.
pub struct MiniGameInstance {
    key: InstanceKey,
    limits: RosterLimits,
    services: Rc<Services>,

    /// Start the countdown automatically once the roster reaches the minimum
    pub auto_start: bool,

    /// Delete the instance as part of stopping it
    pub auto_delete: bool,

    /// Allow rejoin subscriptions
    pub enable_rejoin: bool,

    /// Game mode restored when spectator visuals are reverted
    pub default_game_mode: GameMode,

    pub team_setting: TeamSetting,
    pub world_setting: WorldSetting,
    pub isolation_setting: IsolationSetting,
    pub countdown_setting: CountdownSetting,
    pub spectator: Rc<dyn SpectatorMode>,

    players: HashSet<PlayerId>,
    team: Vec<Vec<PlayerId>>,
    rejoin: HashSet<PlayerId>,
    worlds: WorldSet,

    /// Live copy of `worlds` read by the teleport guard
    guarded_worlds: Rc<RefCell<HashSet<WorldHandle>>>,

    /// Set from hooks and tasks; the template stops the instance on its next tick
    stop_requested: Cell<bool>,

    started: bool,
    finished: bool,
    deleted: bool,

    hooks: HookRegistry,
    listeners: ListenerRegistry,
    tasks: TaskScheduler,
    countdown: Option<CountdownTask>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stopped_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl fmt::Debug for MiniGameInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniGameInstance")
            .field("key", &self.key)
            .field("status", &self.status())
            .field("players", &self.players)
            .field("worlds", &self.worlds)
            .field("hooks", &self.hooks)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl MiniGameInstance {
    pub(crate) fn new(key: InstanceKey, limits: RosterLimits, services: Rc<Services>) -> Self {
        Self {
            key,
            limits,
            services,
            auto_start: true,
            auto_delete: true,
            enable_rejoin: false,
            default_game_mode: GameMode::Adventure,
            team_setting: TeamSetting::default(),
            world_setting: WorldSetting::default(),
            isolation_setting: IsolationSetting::default(),
            countdown_setting: CountdownSetting::default(),
            spectator: Rc::new(GameModeSpectator),
            players: HashSet::new(),
            team: Vec::new(),
            rejoin: HashSet::new(),
            worlds: WorldSet::new(),
            guarded_worlds: Rc::new(RefCell::new(HashSet::new())),
            stop_requested: Cell::new(false),
            started: false,
            finished: false,
            deleted: false,
            hooks: HookRegistry::new(),
            listeners: ListenerRegistry::new(),
            tasks: TaskScheduler::new(),
            countdown: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    // Identity and status

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn id(&self) -> InstanceId {
        self.key.id
    }

    pub fn minigame_name(&self) -> &str {
        &self.key.minigame
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn limits(&self) -> RosterLimits {
        self.limits
    }

    pub fn status(&self) -> InstanceStatus {
        if self.deleted {
            InstanceStatus::Deleted
        } else if self.finished {
            InstanceStatus::Stopped
        } else if self.started {
            InstanceStatus::Started
        } else if self.countdown.is_some() {
            InstanceStatus::Countdown
        } else {
            InstanceStatus::Waiting
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Neither started nor finished.
    pub fn is_open(&self) -> bool {
        !self.started && !self.finished
    }

    pub fn is_counting_down(&self) -> bool {
        self.countdown.is_some()
    }

    /// Seconds the running countdown will report next.
    pub fn countdown_seconds(&self) -> Option<u32> {
        self.countdown.as_ref().map(|c| c.seconds_left())
    }

    // Roster

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.iter().copied()
    }

    /// Roster sorted by player id.
    pub fn sorted_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.players.iter().copied().collect();
        players.sort();
        players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.limits.max
    }

    /// Team assignment computed at start. Empty unless team mode is enabled.
    pub fn team(&self) -> &[Vec<PlayerId>] {
        &self.team
    }

    pub fn team_of(&self, player: PlayerId) -> Option<usize> {
        self.team.iter().position(|t| t.contains(&player))
    }

    pub fn worlds(&self) -> &WorldSet {
        &self.worlds
    }

    /// Attach a world to a slot, returning the displaced singleton occupant.
    /// The template's reverse index is not touched here.
    pub(crate) fn attach_world(&mut self, world: WorldHandle, slot: WorldSlot) -> Option<WorldHandle> {
        let displaced = self.worlds.insert(world, slot);
        self.sync_guarded_worlds();
        displaced
    }

    pub(crate) fn detach_world(&mut self, world: &WorldHandle) -> bool {
        let removed = self.worlds.remove(world);
        self.sync_guarded_worlds();
        removed
    }

    pub(crate) fn clear_worlds(&mut self) -> Vec<WorldHandle> {
        let worlds = self.worlds.clear();
        self.sync_guarded_worlds();
        worlds
    }

    fn sync_guarded_worlds(&self) {
        *self.guarded_worlds.borrow_mut() = self.worlds.handles().into_iter().collect();
    }

    /// Admit a player.
    ///
    /// Fails with [`MiniGameError::OutOfMaxPlayerSize`] when the roster is
    /// already at the template maximum, leaving the roster unchanged.
    /// Re-admitting a current member is a no-op.
    pub fn add_player(&mut self, player: PlayerId) -> Result<(), MiniGameError> {
        if self.players.contains(&player) {
            return Ok(());
        }
        if self.players.len() + 1 > self.limits.max {
            return Err(MiniGameError::OutOfMaxPlayerSize {
                max: self.limits.max,
            });
        }

        self.players.insert(player);
        self.services.directory.admit(player, &self.key);
        debug!(instance = %self.key, player = %player, roster = self.players.len(), "player added");

        self.hooks
            .fire_player(PlayerHookEvent::Added, &HookContext::new(self), player);

        if self.auto_start
            && self.status() == InstanceStatus::Waiting
            && self.players.len() >= self.limits.min
        {
            self.run_start_task();
        }
        Ok(())
    }

    /// Remove a player. Returns whether the player was on the roster.
    ///
    /// Meant for use before the game starts. After start the team assignment
    /// is left untouched; callers own whatever that implies.
    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        if !self.players.remove(&player) {
            return false;
        }

        self.release(player);
        debug!(instance = %self.key, player = %player, roster = self.players.len(), "player removed");

        self.hooks
            .fire_player(PlayerHookEvent::Removed, &HookContext::new(self), player);

        if self.players.len() < self.limits.min {
            self.cancel_start_task();
        }
        true
    }

    // Rejoin

    pub fn rejoin_players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.rejoin.iter().copied()
    }

    pub fn add_rejoin(&mut self, player: PlayerId) {
        self.rejoin.insert(player);
    }

    /// Forget every rejoin-eligible player, persisted entries included.
    pub fn clear_rejoin_data(&mut self) {
        for player in self.rejoin.drain() {
            self.services.directory.clear_rejoin(player, &self.key);
        }
    }

    // Countdown

    /// Begin the countdown. No-op while one is already running.
    pub fn run_start_task(&mut self) {
        if self.countdown.is_some() {
            return;
        }
        self.countdown = Some(CountdownTask::new(&self.countdown_setting));
        info!(instance = %self.key, from = self.countdown_setting.from, "countdown started");
    }

    /// Cancel the countdown. No-op when none is running.
    pub fn cancel_start_task(&mut self) {
        if let Some(mut task) = self.countdown.take() {
            task.cancel();
            info!(instance = %self.key, "countdown cancelled");
        }
    }

    /// Advance countdown and scheduled tasks by one host tick.
    pub fn tick(&mut self) {
        if self.started && !self.finished {
            let due = self.tasks.due();
            let ctx = HookContext::new(self);
            for action in due {
                action(&ctx);
            }
        }

        let step = match self.countdown.as_mut() {
            Some(task) => task.advance(),
            None => CountdownStep::Idle,
        };

        match step {
            CountdownStep::Idle => {}
            CountdownStep::Silent(seconds) => {
                debug!(instance = %self.key, seconds, "countdown");
            }
            CountdownStep::Announce(seconds) => {
                self.broadcast(&self.countdown_setting.render(seconds));
                let players = &self.services.players;
                for player in &self.players {
                    players.play_sound(*player, &self.countdown_setting.sound);
                }
            }
            CountdownStep::Finished => {
                self.countdown = None;
                self.start();
            }
        }
    }

    /// Start procedure. Entered from the terminal countdown step; a second
    /// entry is ignored.
    pub(crate) fn start(&mut self) {
        if self.started {
            return;
        }
        self.finished = false;

        if !self.world_setting.enable_other_world_teleport {
            self.install_teleport_guard();
        }

        let roster = self.sorted_players();

        if self.team_setting.enable {
            self.team = self.team_setting.match_teams(&roster);
        }

        if self.world_setting.link_portal {
            if let Some(primary) = self.worlds.primary() {
                let provisioner = &self.services.worlds;
                if let Some(a) = self.worlds.secondary_a() {
                    provisioner.link_secondary_a(primary, a);
                }
                if let Some(b) = self.worlds.secondary_b() {
                    provisioner.link_secondary_b(primary, b);
                }
            }
        }

        if self.isolation_setting.per_chat {
            self.services.isolation.apply_chat(&self.key);
        }
        if self.isolation_setting.per_player_list {
            self.services.isolation.apply_player_list(&self.key);
        }

        let activated = self.listeners.activate(self.services.events.as_ref());

        let spawn = match (self.world_setting.spawn, self.worlds.primary()) {
            (Some(position), Some(world)) => Some(Location {
                world: world.clone(),
                position,
            }),
            (Some(_), None) => {
                warn!(instance = %self.key, "spawn configured without a primary world");
                None
            }
            _ => None,
        };
        for player in &roster {
            self.services.directory.mark_playing(*player, &self.key);
            if let Some(location) = &spawn {
                self.services.players.teleport(*player, location);
            }
        }

        self.started = true;
        self.started_at = Some(chrono::Utc::now());

        info!(
            instance = %self.key,
            players = roster.len(),
            listeners = activated,
            primary = ?self.worlds.primary().map(|w| w.name()),
            secondary_a = ?self.worlds.secondary_a().map(|w| w.name()),
            secondary_b = ?self.worlds.secondary_b().map(|w| w.name()),
            "instance started"
        );

        self.hooks.fire(HookEvent::Started, &HookContext::new(self));
    }

    /// Cancel spectate teleports where exactly one side is inside this
    /// instance's worlds.
    fn install_teleport_guard(&mut self) {
        let owned = Rc::clone(&self.guarded_worlds);
        let key = self.key.clone();
        self.listeners.subscribe(Subscription::new(
            EventKind::PlayerTeleport,
            Priority::Normal,
            false,
            ListenerScope::Server,
            move |event: &mut HostEvent| {
                let Some(teleport) = &event.teleport else {
                    return;
                };
                let inside = owned.borrow();
                let from_inside = teleport.from.as_ref().is_some_and(|w| inside.contains(w));
                let to_inside = teleport.to.as_ref().is_some_and(|w| inside.contains(w));
                if (from_inside ^ to_inside) && teleport.cause == TeleportCause::Spectate {
                    debug!(instance = %key, "blocked cross-boundary spectate teleport");
                    event.set_cancelled(true);
                }
            },
        ));
    }

    /// First half of stopping: revoke listeners and tasks, revert spectator
    /// visuals, fire stop hooks. The template finishes the transition.
    pub(crate) fn halt(&mut self) {
        self.stop_requested.set(false);
        self.unregister_listeners();
        self.unregister_tasks();
        self.cancel_start_task();

        let players = self.services.players.as_ref();
        for player in &self.players {
            self.spectator
                .revert(players, *player, self.default_game_mode);
        }

        self.stopped_at = Some(chrono::Utc::now());
        self.hooks.fire(HookEvent::Stopped, &HookContext::new(self));
    }

    /// Ask the owning template to stop this instance on its next tick.
    /// Ignored once the instance has finished.
    pub fn request_stop(&self) {
        if !self.finished {
            debug!(instance = %self.key, "stop requested");
            self.stop_requested.set(true);
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.get()
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
        info!(instance = %self.key, "instance stopped");
    }

    /// Clear external per-player state. Spectator visuals are reverted here
    /// only when the instance was deleted without being halted first.
    pub(crate) fn clear_players_data(&mut self) {
        let halted = self.stopped_at.is_some();
        let players = self.services.players.as_ref();
        for player in &self.players {
            self.release(*player);
            if !halted {
                self.spectator
                    .revert(players, *player, self.default_game_mode);
            }
        }
    }

    /// Drop the directory entry of `player` if it still points here.
    fn release(&self, player: PlayerId) {
        if self.services.directory.playing_game(player).as_ref() == Some(&self.key) {
            self.services.directory.clear(player);
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.services.isolation.revert_chat(&self.key);
        self.services.isolation.revert_player_list(&self.key);
    }

    pub(crate) fn fire(&self, event: HookEvent) {
        self.hooks.fire(event, &HookContext::new(self));
    }

    // Spectator

    pub fn apply_spectator(&self, player: PlayerId) {
        self.spectator.apply(self.services.players.as_ref(), player);
    }

    pub fn revert_spectator(&self, player: PlayerId) {
        self.spectator
            .revert(self.services.players.as_ref(), player, self.default_game_mode);
    }

    // Messaging

    pub fn broadcast(&self, message: &str) {
        debug!(instance = %self.key, message, "broadcast");
        for player in &self.players {
            self.services.players.send_message(*player, message);
        }
    }

    pub fn broadcast_with(&self, f: impl Fn(PlayerId)) {
        self.players.iter().copied().for_each(f);
    }

    // Hooks

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn on_minigame_created(&mut self, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.hooks.add(HookEvent::MiniGameCreated, hook);
    }

    pub fn on_instance_created(&mut self, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.hooks.add(HookEvent::InstanceCreated, hook);
    }

    pub fn on_start(&mut self, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.hooks.add(HookEvent::Started, hook);
    }

    pub fn on_stop(&mut self, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.hooks.add(HookEvent::Stopped, hook);
    }

    pub fn on_delete(&mut self, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.hooks.add(HookEvent::Deleted, hook);
    }

    pub fn on_player_added(&mut self, hook: impl Fn(&HookContext<'_>, PlayerId) + 'static) {
        self.hooks.add_player(PlayerHookEvent::Added, hook);
    }

    pub fn on_player_removed(&mut self, hook: impl Fn(&HookContext<'_>, PlayerId) + 'static) {
        self.hooks.add_player(PlayerHookEvent::Removed, hook);
    }

    // Listeners

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Buffer a capability subscription, registered on the host bus at start.
    pub fn listen(
        &mut self,
        kind: EventKind,
        priority: Priority,
        ignore_cancelled: bool,
        all_server_events: bool,
        handler: impl Fn(&mut HostEvent) + 'static,
    ) {
        let scope = if all_server_events {
            ListenerScope::Server
        } else {
            ListenerScope::Instance(self.key.clone())
        };
        self.listeners.subscribe(Subscription::new(
            kind,
            priority,
            ignore_cancelled,
            scope,
            handler,
        ));
    }

    /// Register a listener object on the host bus right away.
    pub fn register_events(&mut self, listener: Rc<dyn Listener>) -> ListenerId {
        self.listeners
            .register_now(self.services.events.as_ref(), listener)
    }

    pub fn on_player_kicked(&mut self, handler: impl Fn(&mut HostEvent) + 'static) {
        self.listen(EventKind::PlayerKick, Priority::Normal, true, false, handler);
    }

    pub fn on_player_disconnected(&mut self, handler: impl Fn(&mut HostEvent) + 'static) {
        self.listen(EventKind::PlayerQuit, Priority::Normal, true, false, handler);
    }

    /// Subscribe to rejoins. Returns `None` without subscribing when rejoin
    /// is disabled.
    pub fn on_player_rejoin(&mut self, handler: impl Fn(&mut HostEvent) + 'static) -> Option<()> {
        if !self.enable_rejoin {
            return None;
        }
        self.listen(EventKind::PlayerJoin, Priority::Normal, true, false, handler);
        Some(())
    }

    pub fn unregister_listeners(&mut self) -> usize {
        self.listeners.revoke_all(self.services.events.as_ref())
    }

    // Tasks

    /// Schedule an action on the host tick while the instance runs.
    pub fn schedule_task(
        &mut self,
        delay_ticks: u32,
        period_ticks: Option<u32>,
        action: impl Fn(&HookContext<'_>) + 'static,
    ) -> TaskId {
        self.tasks.schedule(delay_ticks, period_ticks, Rc::new(action))
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.tasks.cancel(id)
    }

    pub fn unregister_tasks(&mut self) -> usize {
        self.tasks.cancel_all()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Convert to JSON for host status pages.
    pub fn to_json(&self) -> serde_json::Value {
        let team: Vec<Vec<u64>> = self
            .team
            .iter()
            .map(|t| t.iter().map(|p| p.0).collect())
            .collect();

        serde_json::json!({
            "instance": self.key.to_string(),
            "minigame": self.key.minigame,
            "status": self.status().as_str(),
            "players": self.sorted_players().iter().map(|p| p.0).collect::<Vec<_>>(),
            "min_players": self.limits.min,
            "max_players": self.limits.max,
            "countdown": self.countdown_seconds(),
            "team": team,
            "worlds": self.worlds.to_json(),
            "created_at": self.created_at,
            "started_at": self.started_at,
            "stopped_at": self.stopped_at
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::listener::TeleportMove;
    use crate::state::testing::Fakes;
    use crate::state::world::{WorldHandle, WorldSlot};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn make_instance(fakes: &Fakes, min: usize, max: usize) -> MiniGameInstance {
        let mut instance = MiniGameInstance::new(
            InstanceKey::new("duel", InstanceId(1)),
            RosterLimits { min, max },
            fakes.services(),
        );
        instance.countdown_setting = CountdownSetting {
            from: 3,
            initial_delay_ticks: 1,
            period_ticks: 1,
            announce_threshold: 1,
            ..CountdownSetting::default()
        };
        instance
    }

    fn run_until_started(instance: &mut MiniGameInstance) {
        for _ in 0..100 {
            if instance.is_started() {
                return;
            }
            instance.tick();
        }
        panic!("instance never started");
    }

    #[test]
    fn test_capacity_rejects_and_keeps_roster() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 2, 2);

        instance.add_player(PlayerId(1)).unwrap();
        instance.add_player(PlayerId(2)).unwrap();
        let err = instance.add_player(PlayerId(3)).unwrap_err();

        assert!(matches!(err, MiniGameError::OutOfMaxPlayerSize { max: 2 }));
        assert_eq!(instance.player_count(), 2);
        assert!(!instance.has_player(PlayerId(3)));
        assert_eq!(instance.services().directory.playing_game(PlayerId(3)), None);
    }

    #[test]
    fn test_countdown_follows_roster() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 2, 4);

        instance.add_player(PlayerId(1)).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Waiting);

        instance.add_player(PlayerId(2)).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Countdown);

        instance.remove_player(PlayerId(2));
        assert_eq!(instance.status(), InstanceStatus::Waiting);

        instance.add_player(PlayerId(2)).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Countdown);
    }

    #[test]
    fn test_countdown_is_idempotent() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        instance.add_player(PlayerId(1)).unwrap();
        instance.tick();
        let seconds = instance.countdown_seconds();

        instance.add_player(PlayerId(2)).unwrap();
        assert_eq!(instance.countdown_seconds(), seconds);
    }

    #[test]
    fn test_auto_start_disabled() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.auto_start = false;

        instance.add_player(PlayerId(1)).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Waiting);

        instance.run_start_task();
        run_until_started(&mut instance);
        assert_eq!(instance.status(), InstanceStatus::Started);
    }

    #[test]
    fn test_countdown_completion_starts_once() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 2, 4);
        let starts = Rc::new(RefCell::new(0));

        let counter = starts.clone();
        instance.on_start(move |_| *counter.borrow_mut() += 1);
        instance.on_player_disconnected(|_| {});
        instance.on_player_kicked(|_| {});

        instance.add_player(PlayerId(1)).unwrap();
        instance.add_player(PlayerId(2)).unwrap();
        assert_eq!(fakes.bus.active_count(), 0);

        run_until_started(&mut instance);
        assert!(!instance.is_counting_down());
        assert_eq!(fakes.bus.active_count(), 2);

        instance.start();
        for _ in 0..10 {
            instance.tick();
        }
        assert_eq!(*starts.borrow(), 1);
        assert_eq!(fakes.bus.active_count(), 2);
        assert!(instance.started_at.is_some());
    }

    #[test]
    fn test_countdown_announcements() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);

        assert_eq!(
            fakes.players.messages_for(PlayerId(1)),
            vec![
                "Game starts in 3 seconds".to_string(),
                "Game starts in 1 seconds".to_string()
            ]
        );
        assert_eq!(fakes.players.sound_count(), 2);
    }

    #[test]
    fn test_start_marks_players_and_teleports() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.attach_world(WorldHandle::from("w-main"), WorldSlot::Primary);
        instance.world_setting.spawn = Some(crate::state::host::Position::new(0.5, 64.0, 0.5));

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);

        assert!(instance.services().directory.location(PlayerId(1)).is_playing());
        let teleports = fakes.players.teleports();
        assert_eq!(teleports.len(), 1);
        assert_eq!(teleports[0].1.world, WorldHandle::from("w-main"));
    }

    #[test]
    fn test_team_and_links_at_start() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 4, 4);
        instance.team_setting.enable = true;
        instance.world_setting.link_portal = true;
        instance.attach_world(WorldHandle::from("p"), WorldSlot::Primary);
        instance.attach_world(WorldHandle::from("a"), WorldSlot::SecondaryA);
        instance.attach_world(WorldHandle::from("b"), WorldSlot::SecondaryB);

        for id in 1..=4 {
            instance.add_player(PlayerId(id)).unwrap();
        }
        assert!(instance.team().is_empty());
        run_until_started(&mut instance);

        assert_eq!(
            instance.team(),
            &[
                vec![PlayerId(1), PlayerId(3)],
                vec![PlayerId(2), PlayerId(4)]
            ]
        );
        assert_eq!(instance.team_of(PlayerId(4)), Some(1));
        assert_eq!(
            fakes.worlds.log(),
            vec!["link_a p a".to_string(), "link_b p b".to_string()]
        );
    }

    #[test]
    fn test_isolation_applied_at_start() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.isolation_setting.per_chat = true;

        instance.add_player(PlayerId(1)).unwrap();
        let isolation = instance.services().isolation.clone();
        assert!(!isolation.is_chat_scoped(instance.key()));

        run_until_started(&mut instance);
        assert!(isolation.is_chat_scoped(instance.key()));
        assert!(!isolation.is_player_list_scoped(instance.key()));
    }

    #[test]
    fn test_teleport_guard() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.world_setting.enable_other_world_teleport = false;
        instance.attach_world(WorldHandle::from("inside"), WorldSlot::Primary);

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);

        let mut crossing = HostEvent::teleport(
            PlayerId(5),
            TeleportMove {
                from: Some(WorldHandle::from("lobby")),
                to: Some(WorldHandle::from("inside")),
                cause: TeleportCause::Spectate,
            },
        );
        fakes.bus.dispatch(&mut crossing);
        assert!(crossing.is_cancelled());

        let mut within = HostEvent::teleport(
            PlayerId(1),
            TeleportMove {
                from: Some(WorldHandle::from("inside")),
                to: Some(WorldHandle::from("inside")),
                cause: TeleportCause::Spectate,
            },
        );
        fakes.bus.dispatch(&mut within);
        assert!(!within.is_cancelled());

        let mut by_command = HostEvent::teleport(
            PlayerId(1),
            TeleportMove {
                from: Some(WorldHandle::from("inside")),
                to: Some(WorldHandle::from("lobby")),
                cause: TeleportCause::Command,
            },
        );
        fakes.bus.dispatch(&mut by_command);
        assert!(!by_command.is_cancelled());
    }

    #[test]
    fn test_teleport_guard_follows_world_changes() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.world_setting.enable_other_world_teleport = false;
        instance.attach_world(WorldHandle::from("inside"), WorldSlot::Primary);

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);
        instance.attach_world(WorldHandle::from("arena"), WorldSlot::Other);

        let spectate_into = |world: &str| {
            HostEvent::teleport(
                PlayerId(5),
                TeleportMove {
                    from: Some(WorldHandle::from("lobby")),
                    to: Some(WorldHandle::from(world)),
                    cause: TeleportCause::Spectate,
                },
            )
        };

        let mut into_arena = spectate_into("arena");
        fakes.bus.dispatch(&mut into_arena);
        assert!(into_arena.is_cancelled());

        assert!(instance.detach_world(&WorldHandle::from("inside")));
        let mut into_detached = spectate_into("inside");
        fakes.bus.dispatch(&mut into_detached);
        assert!(!into_detached.is_cancelled());
    }

    #[test]
    fn test_start_hooks_run_once_in_order() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        let order = Rc::new(RefCell::new(Vec::new()));

        for name in ["h1", "h2", "h3"] {
            let sink = order.clone();
            instance.on_start(move |_| sink.borrow_mut().push(name));
        }

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);
        assert_eq!(*order.borrow(), vec!["h1", "h2", "h3"]);

        for _ in 0..10 {
            instance.tick();
        }
        assert_eq!(*order.borrow(), vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn test_late_join_keeps_started_state() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);

        instance.add_player(PlayerId(2)).unwrap();
        assert!(!instance.is_counting_down());
        for _ in 0..10 {
            instance.tick();
        }
        assert_eq!(instance.status(), InstanceStatus::Started);
        assert!(fakes.players.messages_for(PlayerId(2)).is_empty());
    }

    #[test]
    fn test_join_after_finish_does_not_count_down() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        instance.halt();
        instance.mark_finished();
        instance.add_player(PlayerId(1)).unwrap();

        assert!(!instance.is_counting_down());
        assert_eq!(instance.status(), InstanceStatus::Stopped);
    }

    #[test]
    fn test_request_stop_sets_flag_until_halt() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.on_start(|ctx| ctx.request_stop());

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);
        assert!(instance.is_stop_requested());

        instance.halt();
        assert!(!instance.is_stop_requested());

        instance.mark_finished();
        instance.request_stop();
        assert!(!instance.is_stop_requested());
    }

    #[test]
    fn test_player_hooks() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 3, 4);
        let log = Rc::new(RefCell::new(Vec::new()));

        let added = log.clone();
        instance.on_player_added(move |ctx, p| {
            added.borrow_mut().push(format!("+{} ({})", p, ctx.instance().player_count()))
        });
        let removed = log.clone();
        instance.on_player_removed(move |_, p| removed.borrow_mut().push(format!("-{}", p)));

        instance.add_player(PlayerId(1)).unwrap();
        instance.add_player(PlayerId(1)).unwrap();
        instance.remove_player(PlayerId(1));
        assert!(!instance.remove_player(PlayerId(1)));

        assert_eq!(*log.borrow(), vec!["+1 (1)".to_string(), "-1".to_string()]);
    }

    #[test]
    fn test_rejoin_subscription_requires_flag() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        assert_eq!(instance.on_player_rejoin(|_| {}), None);
        assert_eq!(instance.listeners().pending_count(), 0);

        instance.enable_rejoin = true;
        assert_eq!(instance.on_player_rejoin(|_| {}), Some(()));
        assert_eq!(instance.listeners().pending_count(), 1);
    }

    #[test]
    fn test_clear_rejoin_data() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);

        instance.add_rejoin(PlayerId(3));
        instance.clear_rejoin_data();

        assert_eq!(instance.rejoin_players().count(), 0);
        assert_eq!(
            fakes.store.deletions(),
            vec![("rejoin_data".to_string(), "3".to_string())]
        );
    }

    #[test]
    fn test_tasks_run_only_while_started() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        let runs = Rc::new(RefCell::new(0));

        let counter = runs.clone();
        instance.schedule_task(1, Some(1), move |_| *counter.borrow_mut() += 1);

        instance.tick();
        assert_eq!(*runs.borrow(), 0);

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);
        instance.tick();
        instance.tick();
        assert_eq!(*runs.borrow(), 2);

        instance.halt();
        instance.tick();
        assert_eq!(*runs.borrow(), 2);
        assert_eq!(instance.task_count(), 0);
    }

    #[test]
    fn test_halt_reverts_spectators_and_revokes() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 1, 4);
        instance.on_player_kicked(|_| {});

        instance.add_player(PlayerId(1)).unwrap();
        run_until_started(&mut instance);
        instance.apply_spectator(PlayerId(1));

        instance.halt();

        assert_eq!(fakes.bus.active_count(), 0);
        assert_eq!(
            fakes.players.game_modes(),
            vec![
                (PlayerId(1), GameMode::Spectator),
                (PlayerId(1), GameMode::Adventure)
            ]
        );
    }

    #[test]
    fn test_to_json() {
        let fakes = Fakes::new();
        let mut instance = make_instance(&fakes, 2, 4);
        instance.add_player(PlayerId(2)).unwrap();

        let json = instance.to_json();
        assert_eq!(json["instance"], "duel#1");
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["players"], serde_json::json!([2]));
        assert_eq!(json["countdown"], serde_json::Value::Null);
    }
}
