//! Per-player instance association.
//!
//! Tracks which instance each player belongs to and mirrors that
//! association into the host's persistence layer.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────┐   join    ┌──────────┐   start   ┌──────────┐
//! │   Idle   │──────────▶│  Queued  │──────────▶│ Playing  │
//! └──────────┘           └────┬─────┘           └────┬─────┘
//!      ▲                      │ leave                │ leave
//!      └──────────────────────┴──────────────────────┘
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use super::host::DataStore;
use super::minigame::InstanceKey;

/// Persistence category holding per-player association state.
pub const PLAYER_DATA_CATEGORY: &str = "player_data";

/// Persistence category holding rejoin eligibility.
pub const REJOIN_DATA_CATEGORY: &str = "rejoin_data";

/// Field name under [`PLAYER_DATA_CATEGORY`].
pub const PLAYING_GAME_FIELD: &str = "playing_game";

/// Opaque host player handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a player currently is relative to the instance pools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlayerLocation {
    /// Not admitted to any instance
    #[default]
    Idle,

    /// Admitted to an instance that has not started yet
    Queued { instance: InstanceKey },

    /// Member of a started instance
    Playing { instance: InstanceKey },
}

impl PlayerLocation {
    pub fn instance(&self) -> Option<&InstanceKey> {
        match self {
            Self::Queued { instance } | Self::Playing { instance } => Some(instance),
            Self::Idle => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing { .. })
    }
}

impl fmt::Display for PlayerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Queued { instance } => write!(f, "Queued({})", instance),
            Self::Playing { instance } => write!(f, "Playing({})", instance),
        }
    }
}

/// State transition events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Join { instance: InstanceKey },
    Start { instance: InstanceKey },
    Leave,
}

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} via {event:?}: {reason}")]
pub struct InvalidTransition {
    pub from: PlayerLocation,
    pub event: PlayerEvent,
    pub reason: &'static str,
}

/// Player association state machine.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    location: PlayerLocation,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self) -> &PlayerLocation {
        &self.location
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: PlayerEvent) -> Result<(), InvalidTransition> {
        self.location = self.transition(&event)?;
        Ok(())
    }

    fn transition(&self, event: &PlayerEvent) -> Result<PlayerLocation, InvalidTransition> {
        use PlayerEvent::*;
        use PlayerLocation::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.location.clone(),
            event: event.clone(),
            reason,
        };

        match (&self.location, event) {
            (Idle, Join { instance }) => Ok(Queued {
                instance: instance.clone(),
            }),
            // Re-admission to the same open instance is harmless.
            (Queued { instance: current }, Join { instance }) if current == instance => {
                Ok(self.location.clone())
            }
            (Queued { .. }, Join { .. }) => Err(invalid("Queued for another instance")),
            (Playing { .. }, Join { .. }) => Err(invalid("Already playing")),

            (Queued { instance: current }, Start { instance })
            | (Playing { instance: current }, Start { instance })
                if current == instance =>
            {
                Ok(Playing {
                    instance: instance.clone(),
                })
            }
            (Idle, Start { .. }) => Err(invalid("Not admitted to any instance")),
            (_, Start { .. }) => Err(invalid("Admitted to a different instance")),

            (Idle, Leave) => Err(invalid("Not admitted to any instance")),
            (_, Leave) => Ok(Idle),
        }
    }
}

/// Directory of player associations, mirrored to persistence.
///
/// The directory is write-through: the core never reads persisted state back.
pub struct PlayerDirectory {
    states: RefCell<HashMap<PlayerId, PlayerState>>,
    store: Rc<dyn DataStore>,
}

impl fmt::Debug for PlayerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerDirectory")
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl PlayerDirectory {
    pub fn new(store: Rc<dyn DataStore>) -> Self {
        Self {
            states: RefCell::new(HashMap::new()),
            store,
        }
    }

    /// Record admission of `player` into `instance`.
    pub fn admit(&self, player: PlayerId, instance: &InstanceKey) {
        self.publish(
            player,
            PlayerEvent::Join {
                instance: instance.clone(),
            },
        );
    }

    /// Record that `instance` started with `player` on its roster.
    pub fn mark_playing(&self, player: PlayerId, instance: &InstanceKey) {
        self.publish(
            player,
            PlayerEvent::Start {
                instance: instance.clone(),
            },
        );
    }

    /// Clear the association of `player`. No-op for unknown players.
    pub fn clear(&self, player: PlayerId) {
        let previous = self.states.borrow_mut().remove(&player);
        if let Some(instance) = previous.as_ref().and_then(|s| s.location().instance()) {
            self.store.delete_value(
                PLAYER_DATA_CATEGORY,
                &player.to_string(),
                PLAYING_GAME_FIELD,
                &serde_json::json!(instance.to_string()),
            );
        }
    }

    /// Current location of a player.
    pub fn location(&self, player: PlayerId) -> PlayerLocation {
        self.states
            .borrow()
            .get(&player)
            .map(|s| s.location().clone())
            .unwrap_or_default()
    }

    /// Instance a player is associated with, if any.
    pub fn playing_game(&self, player: PlayerId) -> Option<InstanceKey> {
        self.location(player).instance().cloned()
    }

    /// Drop the persisted rejoin entry for `player`.
    pub fn clear_rejoin(&self, player: PlayerId, instance: &InstanceKey) {
        self.store.delete_value(
            REJOIN_DATA_CATEGORY,
            &player.to_string(),
            PLAYING_GAME_FIELD,
            &serde_json::json!(instance.to_string()),
        );
    }

    /// Number of players with a live association.
    pub fn len(&self) -> usize {
        self.states.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.borrow().is_empty()
    }

    fn publish(&self, player: PlayerId, event: PlayerEvent) {
        let location = {
            let mut states = self.states.borrow_mut();
            let state = states.entry(player).or_default();
            if let Err(err) = state.apply_mut(event.clone()) {
                // The roster is the source of truth; the directory follows it.
                warn!(player = %player, error = %err, "overriding player association");
                let forced = match event {
                    PlayerEvent::Join { instance } => PlayerLocation::Queued { instance },
                    PlayerEvent::Start { instance } => PlayerLocation::Playing { instance },
                    PlayerEvent::Leave => PlayerLocation::Idle,
                };
                *state = PlayerState { location: forced };
            }
            state.location().clone()
        };

        if let Some(instance) = location.instance() {
            self.store.set_value(
                PLAYER_DATA_CATEGORY,
                &player.to_string(),
                PLAYING_GAME_FIELD,
                &serde_json::json!(instance.to_string()),
            );
        }
    }
}
