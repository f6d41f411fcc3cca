// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FirewallError;

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No checks, no learning. Rule administration is only allowed here.
    #[default]
    Disabled,
    /// Every unseen statement becomes a whitelist rule for its actor
    Learning,
    /// Prohibited statements are logged and allowed
    Permissive,
    /// Prohibited statements are rejected
    Enforcing,
}

impl Mode {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Learning => 1,
            Self::Permissive => 2,
            Self::Enforcing => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Learning,
            2 => Self::Permissive,
            3 => Self::Enforcing,
            _ => Self::Disabled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Learning => "learning",
            Self::Permissive => "permissive",
            Self::Enforcing => "enforcing",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "learning" => Ok(Self::Learning),
            "permissive" => Ok(Self::Permissive),
            "enforcing" => Ok(Self::Enforcing),
            other => Err(FirewallError::invalid_config(format!("unknown mode '{other}'"))),
        }
    }
}

/// Which rule lists the engine consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Allowed only if whitelisted
    Whitelist,
    /// Allowed unless blacklisted
    Blacklist,
    /// Allowed if whitelisted and not blacklisted
    #[default]
    Hybrid,
}

impl Strategy {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Whitelist => 0,
            Self::Blacklist => 1,
            Self::Hybrid => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Whitelist,
            1 => Self::Blacklist,
            _ => Self::Hybrid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn uses_whitelist(self) -> bool {
        matches!(self, Self::Whitelist | Self::Hybrid)
    }

    pub fn uses_blacklist(self) -> bool {
        matches!(self, Self::Blacklist | Self::Hybrid)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whitelist" => Ok(Self::Whitelist),
            "blacklist" => Ok(Self::Blacklist),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(FirewallError::invalid_config(format!("unknown engine '{other}'"))),
        }
    }
}
