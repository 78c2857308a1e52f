//! Per-instance settings.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::host::Position;
use super::player::PlayerId;
use super::world::WorldHandle;

/// Splits a roster into teams.
pub trait TeamMatcher {
    fn match_teams(&self, players: &[PlayerId]) -> Vec<Vec<PlayerId>>;
}

/// Deals the sorted roster round-robin into a fixed number of teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinMatcher {
    pub team_count: usize,
}

impl TeamMatcher for RoundRobinMatcher {
    fn match_teams(&self, players: &[PlayerId]) -> Vec<Vec<PlayerId>> {
        let team_count = self.team_count.max(1);
        let mut sorted = players.to_vec();
        sorted.sort();

        let mut teams = vec![Vec::new(); team_count];
        for (i, player) in sorted.into_iter().enumerate() {
            teams[i % team_count].push(player);
        }
        teams.retain(|team| !team.is_empty());
        teams
    }
}

/// Team mode.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSetting {
    pub enable: bool,

    /// Team count used by the default matcher.
    pub team_count: usize,

    /// Overrides the default round-robin matcher.
    #[serde(skip)]
    pub matcher: Option<Rc<dyn TeamMatcher>>,
}

impl fmt::Debug for TeamSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamSetting")
            .field("enable", &self.enable)
            .field("team_count", &self.team_count)
            .field("custom_matcher", &self.matcher.is_some())
            .finish()
    }
}

impl Default for TeamSetting {
    fn default() -> Self {
        Self {
            enable: false,
            team_count: 2,
            matcher: None,
        }
    }
}

impl TeamSetting {
    pub fn match_teams(&self, players: &[PlayerId]) -> Vec<Vec<PlayerId>> {
        match &self.matcher {
            Some(matcher) => matcher.match_teams(players),
            None => RoundRobinMatcher {
                team_count: self.team_count,
            }
            .match_teams(players),
        }
    }
}

/// Which base worlds an instance clones and how it treats them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSetting {
    pub base_world: Option<WorldHandle>,
    pub base_secondary_a: Option<WorldHandle>,
    pub base_secondary_b: Option<WorldHandle>,
    pub other_base_worlds: Vec<WorldHandle>,

    /// Link primary with both secondaries at start.
    pub link_portal: bool,

    /// When false, spectate teleports across the instance boundary are
    /// cancelled while the instance runs.
    pub enable_other_world_teleport: bool,

    /// Where roster members are sent at start, inside the primary world.
    pub spawn: Option<Position>,
}

impl Default for WorldSetting {
    fn default() -> Self {
        Self {
            base_world: None,
            base_secondary_a: None,
            base_secondary_b: None,
            other_base_worlds: Vec::new(),
            link_portal: false,
            enable_other_world_teleport: true,
            spawn: None,
        }
    }
}

/// Chat and player-list scoping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSetting {
    pub per_chat: bool,
    pub per_player_list: bool,
}
