//! Channel configuration.

use std::fmt;
use std::str::FromStr;

/// Which end of the pipe this channel is. Only matters for race resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

/// Who gets served first when both sides call each other at once.
///
/// The winning side's out-call is answered first: the winner defers the
/// in-call it received, the loser processes its in-call immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RacePolicy {
    #[default]
    ChildWins,
    ParentWins,
    /// Races are treated as fatal.
    Error,
}

impl RacePolicy {
    /// Whether `side` should defer a raced in-call. `None` when the policy
    /// refuses to resolve races at all.
    pub fn defers(self, side: Side) -> Option<bool> {
        match self {
            Self::ChildWins => Some(side == Side::Child),
            Self::ParentWins => Some(side == Side::Parent),
            Self::Error => None,
        }
    }
}

/// Unrecognized configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value '{}'", self.0)
    }
}

impl std::error::Error for ParseError {}

impl FromStr for Side {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parent" => Ok(Self::Parent),
            "child" => Ok(Self::Child),
            _ => Err(ParseError(s.to_string())),
        }
    }
}

impl FromStr for RacePolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "childwins" => Ok(Self::ChildWins),
            "parentwins" => Ok(Self::ParentWins),
            "error" => Ok(Self::Error),
            _ => Err(ParseError(s.to_string())),
        }
    }
}

/// Static settings for one [`crate::RpcChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Used in log fields only.
    pub name: String,
    pub side: Side,
    pub race_policy: RacePolicy,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, side: Side) -> Self {
        Self {
            name: name.into(),
            side,
            race_policy: RacePolicy::default(),
        }
    }

    pub fn race_policy(mut self, policy: RacePolicy) -> Self {
        self.race_policy = policy;
        self
    }
}
