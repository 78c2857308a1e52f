//! State management for pooled minigame sessions.
//!
//! This module provides the core state types and managers:
//!
//! - `minigame` - Templates and their instance pools
//! - `instance` - Per-instance state machine (waiting → countdown → started → stopped)
//! - `player` - Player association state machine, mirrored to persistence
//! - `hooks` / `listener` - Lifecycle hooks and host event subscriptions
//! - `countdown` / `task` - Tick-driven timers
//! - `host` - Contracts for the host collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           MiniGameServer                                 │
//! │                                                                          │
//! │  ┌─────────────────────────────┐   ┌─────────────────────────────────┐   │
//! │  │ MiniGame (per template)     │   │ Services (shared)               │   │
//! │  │                             │   │                                 │   │
//! │  │ instance_id →               │   │ WorldProvisioner   EventBus     │   │
//! │  │   MiniGameInstance          │   │ PlayerHost         DataStore    │   │
//! │  │                             │   │                                 │   │
//! │  │ world →                     │   │ IsolationTargets                │   │
//! │  │   instance_id               │   │ PlayerDirectory: player →       │   │
//! │  │                             │   │   Idle / Queued / Playing       │   │
//! │  └─────────────────────────────┘   └─────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use minigame_state::state::{MiniGameConfig, MiniGameServer, PlayerId, Services};
//!
//! let services = Rc::new(Services::new(worlds, events, players, store));
//! let mut server = MiniGameServer::new(services);
//!
//! server.register(MiniGameConfig::new("spleef", 2, 8), |instance| {
//!     instance.on_start(|ctx| ctx.broadcast("Go!"));
//! })?;
//!
//! let key = server.join("spleef", PlayerId(1))?;
//! server.tick();
//! ```

pub mod countdown;
pub mod error;
pub mod hooks;
pub mod host;
pub mod instance;
pub mod listener;
pub mod minigame;
pub mod player;
pub mod settings;
pub mod task;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};

// Re-export commonly used types
pub use countdown::{CountdownSetting, CountdownStep, CountdownTask, TICKS_PER_SECOND};
pub use error::MiniGameError;
pub use hooks::{HookContext, HookEvent, HookRegistry, PlayerHookEvent};
pub use host::{
    DataStore, EventBus, GameMode, GameModeSpectator, IsolationTargets, Location, PlayerHost,
    Position, Services, SoundCue, SpectatorMode, WorldProvisioner,
};
pub use instance::{InstanceStatus, MiniGameInstance, RosterLimits};
pub use listener::{
    EventKind, HostEvent, LifecycleEvent, Listener, ListenerId, ListenerRegistry, ListenerScope,
    Priority, Subscription, TeleportCause, TeleportMove,
};
pub use minigame::{InstanceId, InstanceKey, MiniGame, MiniGameConfig};
pub use player::{
    InvalidTransition, PlayerDirectory, PlayerEvent, PlayerId, PlayerLocation, PlayerState,
    PLAYER_DATA_CATEGORY, REJOIN_DATA_CATEGORY,
};
pub use settings::{IsolationSetting, RoundRobinMatcher, TeamMatcher, TeamSetting, WorldSetting};
pub use task::TaskId;
pub use world::{WorldHandle, WorldSet, WorldSlot};

/// Coordinator owning every registered template and the shared services.
#[derive(Debug)]
pub struct MiniGameServer {
    services: Rc<Services>,

    /// Templates by name
    minigames: HashMap<String, MiniGame>,

    /// Registration order, for ticking and snapshots
    order: Vec<String>,
}

impl MiniGameServer {
    pub fn new(services: Rc<Services>) -> Self {
        Self {
            services,
            minigames: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn services(&self) -> &Rc<Services> {
        &self.services
    }

    /// Register a template. `configure` runs on every instance it creates.
    pub fn register(
        &mut self,
        config: MiniGameConfig,
        configure: impl Fn(&mut MiniGameInstance) + 'static,
    ) -> Result<&mut MiniGame, MiniGameError> {
        if self.minigames.contains_key(&config.name) {
            return Err(MiniGameError::DuplicateMiniGame(config.name));
        }

        let name = config.name.clone();
        let minigame = MiniGame::new(config, Rc::clone(&self.services), configure)?;
        self.order.push(name.clone());
        Ok(self.minigames.entry(name).or_insert(minigame))
    }

    /// Get template by name.
    pub fn get(&self, name: &str) -> Option<&MiniGame> {
        self.minigames.get(name)
    }

    /// Get mutable template by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut MiniGame> {
        self.minigames.get_mut(name)
    }

    /// Templates in registration order.
    pub fn minigames(&self) -> impl Iterator<Item = &MiniGame> {
        self.order.iter().filter_map(|name| self.minigames.get(name))
    }

    /// Look up an instance by key.
    pub fn instance(&self, key: &InstanceKey) -> Option<&MiniGameInstance> {
        self.minigames.get(&key.minigame)?.instance(key.id)
    }

    pub fn instance_mut(&mut self, key: &InstanceKey) -> Option<&mut MiniGameInstance> {
        self.minigames.get_mut(&key.minigame)?.instance_mut(key.id)
    }

    /// Route a player into the recommended open instance of `name`.
    pub fn join(&mut self, name: &str, player: PlayerId) -> Result<InstanceKey, MiniGameError> {
        if let Some(instance) = self.services.directory.playing_game(player) {
            return Err(MiniGameError::AlreadyInGame { player, instance });
        }

        let minigame = self
            .minigames
            .get_mut(name)
            .ok_or_else(|| MiniGameError::UnknownMiniGame(name.to_string()))?;
        let id = minigame
            .recommend_matching_instance()
            .map(|i| i.id())
            .ok_or_else(|| MiniGameError::NoMatchingInstance(name.to_string()))?;

        minigame.add_player(id, player)?;
        let key = InstanceKey::new(name, id);
        debug!(instance = %key, player = %player, "player joined");
        Ok(key)
    }

    /// Remove a player from whatever instance holds them. Returns whether the
    /// player was on a roster.
    pub fn leave(&mut self, player: PlayerId) -> bool {
        let Some(key) = self.services.directory.playing_game(player) else {
            return false;
        };

        if let Some(instance) = self.instance_mut(&key) {
            return instance.remove_player(player);
        }
        // The instance went away without clearing this entry.
        self.services.directory.clear(player);
        false
    }

    /// Instance a player belongs to.
    pub fn playing_game(&self, player: PlayerId) -> Option<InstanceKey> {
        self.services.directory.playing_game(player)
    }

    /// Stop an instance through its template.
    pub fn stop(&mut self, key: &InstanceKey) -> Result<(), MiniGameError> {
        self.minigames
            .get_mut(&key.minigame)
            .ok_or_else(|| MiniGameError::UnknownMiniGame(key.minigame.clone()))?
            .stop_instance(key.id)
    }

    /// Advance every template by one host tick.
    pub fn tick(&mut self) {
        for name in &self.order {
            if let Some(minigame) = self.minigames.get_mut(name) {
                minigame.tick();
            }
        }
    }

    /// Stop every template and drop process-wide state.
    pub fn shutdown(&mut self) -> Result<(), MiniGameError> {
        for name in &self.order {
            if let Some(minigame) = self.minigames.get_mut(name) {
                minigame.stop_all()?;
            }
        }
        self.services.isolation.clear();
        self.services.store.delete_category(PLAYER_DATA_CATEGORY);
        info!(minigames = self.order.len(), "minigame server shut down");
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "minigames": self.minigames().map(|m| m.to_json()).collect::<Vec<_>>()
        })
    }
}
