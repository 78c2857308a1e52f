//! Lifecycle hooks.
//!
//! Hooks run synchronously, in registration order, whenever their lifecycle
//! event fires. A panicking hook propagates to the caller of the triggering
//! operation and aborts the rest of the transition.

use std::fmt;
use std::rc::Rc;

use super::host::Services;
use super::instance::MiniGameInstance;
use super::minigame::InstanceKey;
use super::player::PlayerId;

/// Instance-scoped lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Fired once per template, on a throwaway prototype instance
    MiniGameCreated,
    InstanceCreated,
    Started,
    Stopped,
    Deleted,
}

/// Player-scoped lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerHookEvent {
    Added,
    Removed,
}

pub type InstanceHook = Rc<dyn Fn(&HookContext<'_>)>;
pub type PlayerHook = Rc<dyn Fn(&HookContext<'_>, PlayerId)>;

/// View of the firing instance handed to hooks.
pub struct HookContext<'a> {
    instance: &'a MiniGameInstance,
}

impl<'a> HookContext<'a> {
    pub fn new(instance: &'a MiniGameInstance) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &'a MiniGameInstance {
        self.instance
    }

    pub fn key(&self) -> &'a InstanceKey {
        self.instance.key()
    }

    pub fn services(&self) -> &'a Services {
        self.instance.services()
    }

    /// Send a message to every roster member.
    pub fn broadcast(&self, message: &str) {
        self.instance.broadcast(message);
    }

    pub fn send_message(&self, player: PlayerId, message: &str) {
        self.services().players.send_message(player, message);
    }

    /// End the game. The template stops the instance on its next tick.
    pub fn request_stop(&self) {
        self.instance.request_stop();
    }
}

/// Ordered hook lists, one per event.
#[derive(Default)]
pub struct HookRegistry {
    minigame_created: Vec<InstanceHook>,
    instance_created: Vec<InstanceHook>,
    started: Vec<InstanceHook>,
    stopped: Vec<InstanceHook>,
    deleted: Vec<InstanceHook>,
    player_added: Vec<PlayerHook>,
    player_removed: Vec<PlayerHook>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("minigame_created", &self.minigame_created.len())
            .field("instance_created", &self.instance_created.len())
            .field("started", &self.started.len())
            .field("stopped", &self.stopped.len())
            .field("deleted", &self.deleted.len())
            .field("player_added", &self.player_added.len())
            .field("player_removed", &self.player_removed.len())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: HookEvent, hook: impl Fn(&HookContext<'_>) + 'static) {
        self.list_mut(event).push(Rc::new(hook));
    }

    pub fn add_player(
        &mut self,
        event: PlayerHookEvent,
        hook: impl Fn(&HookContext<'_>, PlayerId) + 'static,
    ) {
        self.player_list_mut(event).push(Rc::new(hook));
    }

    pub fn fire(&self, event: HookEvent, ctx: &HookContext<'_>) {
        for hook in self.list(event) {
            hook(ctx);
        }
    }

    pub fn fire_player(&self, event: PlayerHookEvent, ctx: &HookContext<'_>, player: PlayerId) {
        for hook in self.player_list(event) {
            hook(ctx, player);
        }
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.list(event).len()
    }

    fn list(&self, event: HookEvent) -> &[InstanceHook] {
        match event {
            HookEvent::MiniGameCreated => &self.minigame_created,
            HookEvent::InstanceCreated => &self.instance_created,
            HookEvent::Started => &self.started,
            HookEvent::Stopped => &self.stopped,
            HookEvent::Deleted => &self.deleted,
        }
    }

    fn list_mut(&mut self, event: HookEvent) -> &mut Vec<InstanceHook> {
        match event {
            HookEvent::MiniGameCreated => &mut self.minigame_created,
            HookEvent::InstanceCreated => &mut self.instance_created,
            HookEvent::Started => &mut self.started,
            HookEvent::Stopped => &mut self.stopped,
            HookEvent::Deleted => &mut self.deleted,
        }
    }

    fn player_list(&self, event: PlayerHookEvent) -> &[PlayerHook] {
        match event {
            PlayerHookEvent::Added => &self.player_added,
            PlayerHookEvent::Removed => &self.player_removed,
        }
    }

    fn player_list_mut(&mut self, event: PlayerHookEvent) -> &mut Vec<PlayerHook> {
        match event {
            PlayerHookEvent::Added => &mut self.player_added,
            PlayerHookEvent::Removed => &mut self.player_removed,
        }
    }
}
