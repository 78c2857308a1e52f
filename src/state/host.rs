//! Host collaborator contracts.
//!
//! The engine drives worlds, players, persistence and the host event bus only
//! through these traits. [`Services`] bundles one implementation of each and
//! is shared by every template and instance.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use super::listener::{LifecycleEvent, Listener, ListenerId, Subscription};
use super::minigame::InstanceKey;
use super::player::{PlayerDirectory, PlayerId};
use super::world::WorldHandle;

/// Clones, deletes and links isolated worlds.
pub trait WorldProvisioner {
    /// Clone `source` under a new name. The returned handle must be unique
    /// among all live handles.
    fn clone_world(&self, source: &WorldHandle, name: &str) -> WorldHandle;

    /// Delete a world. Deleting an already-deleted handle is a no-op.
    fn delete_world(&self, world: &WorldHandle);

    /// Link the primary world with its secondary-A counterpart.
    fn link_secondary_a(&self, primary: &WorldHandle, secondary: &WorldHandle);

    /// Link the primary world with its secondary-B counterpart.
    fn link_secondary_b(&self, primary: &WorldHandle, secondary: &WorldHandle);
}

/// The host's event bus.
pub trait EventBus {
    /// Register a capability subscription. Fire-and-forget.
    fn register(&self, subscription: &Subscription) -> ListenerId;

    /// Register a pre-built listener object.
    fn register_listener(&self, listener: Rc<dyn Listener>) -> ListenerId;

    /// Revoke everything registered under `id`.
    fn unregister_all(&self, id: ListenerId);

    /// Publish a lifecycle notification to the host.
    fn publish(&self, event: &LifecycleEvent);
}

/// Player primitives of the host.
pub trait PlayerHost {
    fn teleport(&self, player: PlayerId, to: &Location);
    fn set_game_mode(&self, player: PlayerId, mode: GameMode);
    fn send_message(&self, player: PlayerId, text: &str);
    fn play_sound(&self, player: PlayerId, cue: &SoundCue);
}

/// Write-only persistence. `category` plays the role of a table or collection.
pub trait DataStore {
    fn set_value(&self, category: &str, id: &str, field: &str, value: &serde_json::Value);
    fn delete_value(&self, category: &str, id: &str, field: &str, value: &serde_json::Value);
    fn delete_category(&self, category: &str);
}

/// Toggles spectator visuals for a player.
pub trait SpectatorMode {
    fn apply(&self, players: &dyn PlayerHost, player: PlayerId);
    fn revert(&self, players: &dyn PlayerHost, player: PlayerId, default_mode: GameMode);
}

/// Spectator handling through plain game mode switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameModeSpectator;

impl SpectatorMode for GameModeSpectator {
    fn apply(&self, players: &dyn PlayerHost, player: PlayerId) {
        players.set_game_mode(player, GameMode::Spectator);
    }

    fn revert(&self, players: &dyn PlayerHost, player: PlayerId, default_mode: GameMode) {
        players.set_game_mode(player, default_mode);
    }
}

/// Host game modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Creative,
    #[default]
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Survival => "survival",
            Self::Creative => "creative",
            Self::Adventure => "adventure",
            Self::Spectator => "spectator",
        }
    }
}

/// A point inside a world, without the world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// A teleport target.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: WorldHandle,
    pub position: Position,
}

/// An audible cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundCue {
    pub name: String,
    pub volume: f32,
    pub pitch: f32,
}

impl Default for SoundCue {
    fn default() -> Self {
        Self {
            name: "block.note_block.bass".to_string(),
            volume: 1.0,
            pitch: 5.0,
        }
    }
}

/// Instances whose chat and player list are scoped to their roster.
///
/// Cloning shares the underlying sets, so a chat-relay worker on another
/// thread can hold its own copy.
#[derive(Debug, Clone, Default)]
pub struct IsolationTargets {
    chat: Arc<DashSet<InstanceKey>>,
    player_list: Arc<DashSet<InstanceKey>>,
}

impl IsolationTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_chat(&self, instance: &InstanceKey) {
        self.chat.insert(instance.clone());
    }

    pub fn revert_chat(&self, instance: &InstanceKey) {
        self.chat.remove(instance);
    }

    pub fn apply_player_list(&self, instance: &InstanceKey) {
        self.player_list.insert(instance.clone());
    }

    pub fn revert_player_list(&self, instance: &InstanceKey) {
        self.player_list.remove(instance);
    }

    pub fn is_chat_scoped(&self, instance: &InstanceKey) -> bool {
        self.chat.contains(instance)
    }

    pub fn is_player_list_scoped(&self, instance: &InstanceKey) -> bool {
        self.player_list.contains(instance)
    }

    /// Drop every target. Called once at host teardown.
    pub fn clear(&self) {
        self.chat.clear();
        self.player_list.clear();
    }
}

/// Shared host collaborators plus the coordinator-owned state they need.
pub struct Services {
    pub worlds: Rc<dyn WorldProvisioner>,
    pub events: Rc<dyn EventBus>,
    pub players: Rc<dyn PlayerHost>,
    pub store: Rc<dyn DataStore>,
    pub isolation: IsolationTargets,
    pub directory: PlayerDirectory,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("isolation", &self.isolation)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl Services {
    pub fn new(
        worlds: Rc<dyn WorldProvisioner>,
        events: Rc<dyn EventBus>,
        players: Rc<dyn PlayerHost>,
        store: Rc<dyn DataStore>,
    ) -> Self {
        Self {
            directory: PlayerDirectory::new(Rc::clone(&store)),
            worlds,
            events,
            players,
            store,
            isolation: IsolationTargets::new(),
        }
    }
}
