//! Host event subscriptions owned by an instance.
//!
//! Two pools exist per instance. Capability subscriptions are buffered and
//! registered on the host bus only when the instance starts. Pre-built
//! listener objects go to the bus immediately. Both pools are revoked in bulk
//! when the instance stops or is deleted.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use super::host::EventBus;
use super::minigame::InstanceKey;
use super::player::PlayerId;
use super::world::WorldHandle;

/// Identifier the host bus hands back for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(pub u64);

/// Host event kinds an instance can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerTeleport,
    PlayerKick,
    PlayerQuit,
    PlayerJoin,
    PlayerChat,
    Custom(String),
}

/// Dispatch priority on the host bus, lowest runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Monitor,
}

/// Why a player is being teleported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportCause {
    Spectate,
    Command,
    Plugin,
    EnderPearl,
    NetherPortal,
    EndPortal,
    Unknown,
}

/// Endpoints of a teleport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleportMove {
    pub from: Option<WorldHandle>,
    pub to: Option<WorldHandle>,
    pub cause: TeleportCause,
}

/// An event raised by the host and delivered to subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub kind: EventKind,
    pub player: Option<PlayerId>,
    pub teleport: Option<TeleportMove>,
    cancelled: bool,
}

impl HostEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            player: None,
            teleport: None,
            cancelled: false,
        }
    }

    pub fn with_player(mut self, player: PlayerId) -> Self {
        self.player = Some(player);
        self
    }

    pub fn teleport(player: PlayerId, teleport: TeleportMove) -> Self {
        Self {
            kind: EventKind::PlayerTeleport,
            player: Some(player),
            teleport: Some(teleport),
            cancelled: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

/// Notifications the engine publishes to the host bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    InstanceDeleted(InstanceKey),
}

/// Which events a subscription sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerScope {
    /// Only events whose player belongs to this instance. The host resolves
    /// membership through the player directory.
    Instance(InstanceKey),
    /// Every event of the kind, server wide.
    Server,
}

pub type EventHandler = Rc<dyn Fn(&mut HostEvent)>;

/// A capability subscription.
#[derive(Clone)]
pub struct Subscription {
    pub kind: EventKind,
    pub priority: Priority,
    pub ignore_cancelled: bool,
    pub scope: ListenerScope,
    handler: EventHandler,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(
        kind: EventKind,
        priority: Priority,
        ignore_cancelled: bool,
        scope: ListenerScope,
        handler: impl Fn(&mut HostEvent) + 'static,
    ) -> Self {
        Self {
            kind,
            priority,
            ignore_cancelled,
            scope,
            handler: Rc::new(handler),
        }
    }

    /// Run the handler, honoring the cancelled filter.
    pub fn handle(&self, event: &mut HostEvent) {
        if self.ignore_cancelled && event.is_cancelled() {
            return;
        }
        (self.handler)(event);
    }
}

/// A pre-built listener object.
pub trait Listener {
    fn on_event(&self, event: &mut HostEvent);
}

/// Subscriptions and listener registrations owned by one instance.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    pending: Vec<Subscription>,
    active: Vec<ListenerId>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a subscription until [`activate`](Self::activate).
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.pending.push(subscription);
    }

    /// Register a listener object right away.
    pub fn register_now(&mut self, bus: &dyn EventBus, listener: Rc<dyn Listener>) -> ListenerId {
        let id = bus.register_listener(listener);
        self.active.push(id);
        id
    }

    /// Register every buffered subscription. Each one is registered once.
    pub fn activate(&mut self, bus: &dyn EventBus) -> usize {
        let pending = std::mem::take(&mut self.pending);
        for subscription in &pending {
            let id = bus.register(subscription);
            self.active.push(id);
        }
        pending.len()
    }

    /// Revoke every active registration. Buffered subscriptions are dropped too.
    pub fn revoke_all(&mut self, bus: &dyn EventBus) -> usize {
        self.pending.clear();
        let active = std::mem::take(&mut self.active);
        for id in &active {
            bus.unregister_all(*id);
        }
        active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
