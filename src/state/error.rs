//! Error types for template and instance operations.

use thiserror::Error;

use super::minigame::{InstanceId, InstanceKey};
use super::player::PlayerId;

/// Errors surfaced to whatever initiated a template or instance operation.
#[derive(Debug, Error)]
pub enum MiniGameError {
    /// Admission would push the roster past the template's `max_player_size`.
    #[error("Roster is full: at most {max} players allowed")]
    OutOfMaxPlayerSize { max: usize },

    /// The instance is not (or no longer) owned by the template.
    #[error("Instance {0} not found")]
    InstanceNotFound(InstanceId),

    /// No template is registered under this name.
    #[error("Unknown minigame: {0}")]
    UnknownMiniGame(String),

    /// A template with this name is already registered.
    #[error("Minigame already registered: {0}")]
    DuplicateMiniGame(String),

    /// The player is already associated with an instance.
    #[error("Player {player} is already in {instance}")]
    AlreadyInGame {
        player: PlayerId,
        instance: InstanceKey,
    },

    /// Every instance of the template is started or finished.
    #[error("No open instance of {0}")]
    NoMatchingInstance(String),

    /// Template limits are inconsistent.
    #[error("Invalid minigame config: {0}")]
    InvalidConfig(String),

    /// Template config could not be parsed.
    #[error("Malformed minigame config: {0}")]
    MalformedConfig(#[from] serde_json::Error),
}

impl MiniGameError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this is the capacity condition a rejected join should report.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::OutOfMaxPlayerSize { .. })
    }
}
