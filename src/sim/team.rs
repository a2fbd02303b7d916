//! Teams and team masks

use serde::{Deserialize, Serialize};

use super::tuning::MAX_TEAMS;

/// Team index, or [`Team::NONE`] for neutral objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Team(i8);

impl Team {
    pub const NONE: Team = Team(-1);

    /// Team `index`. Out-of-range indices collapse to [`Team::NONE`].
    pub fn new(index: usize) -> Self {
        if index < MAX_TEAMS {
            Team(index as i8)
        } else {
            Team::NONE
        }
    }

    pub(crate) fn from_wire(value: i8) -> Self {
        if value >= 0 && (value as usize) < MAX_TEAMS {
            Team(value)
        } else {
            Team::NONE
        }
    }

    pub(crate) fn to_wire(self) -> i8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    pub fn index(self) -> Option<usize> {
        if self.is_none() {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Iterate every real team
    pub fn all() -> impl Iterator<Item = Team> {
        (0..MAX_TEAMS).map(Team::new)
    }
}

impl Default for Team {
    fn default() -> Self {
        Team::NONE
    }
}

/// Set of teams. Bit `MAX_TEAMS` stands for the neutral team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamMask(u8);

impl TeamMask {
    const NEUTRAL_BIT: u8 = 1 << MAX_TEAMS;

    pub const ALL: TeamMask = TeamMask(u8::MAX);
    pub const EMPTY: TeamMask = TeamMask(0);
    pub const NEUTRAL: TeamMask = TeamMask(Self::NEUTRAL_BIT);

    pub fn only(team: Team) -> Self {
        match team.index() {
            Some(i) => TeamMask(1 << i),
            None => Self::NEUTRAL,
        }
    }

    /// Every team except `team`, neutral included
    pub fn enemies_of(team: Team) -> Self {
        TeamMask(!Self::only(team).0)
    }

    pub fn with(self, team: Team) -> Self {
        TeamMask(self.0 | Self::only(team).0)
    }

    pub fn matches(self, team: Team) -> bool {
        self.0 & Self::only(team).0 != 0
    }
}
