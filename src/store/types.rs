// SPDX-License-Identifier: Apache-2.0

//! Rule Store Types

use std::fmt;
use std::str::FromStr;

use qore_fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

use crate::error::FirewallError;

/// Host-assigned actor (role) id. `ActorId::ANY` scopes a rule to every actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl ActorId {
    pub const ANY: ActorId = ActorId(0);

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rule list an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Whitelist,
    Blacklist,
    /// Placeholder kind for unresolved names. Never stored or persisted.
    Dummy,
}

impl RuleKind {
    /// Single-letter code used by the snapshot and CSV formats.
    pub fn code(self) -> char {
        match self {
            Self::Whitelist => 'w',
            Self::Blacklist => 'b',
            Self::Dummy => 'd',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'w' => Some(Self::Whitelist),
            'b' => Some(Self::Blacklist),
            'd' => Some(Self::Dummy),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
            Self::Dummy => "dummy",
        }
    }

    /// Whitelist or blacklist.
    pub fn is_real(self) -> bool {
        !matches!(self, Self::Dummy)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleKind {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "whitelist" | "w" => Ok(Self::Whitelist),
            "blacklist" | "b" => Ok(Self::Blacklist),
            "dummy" | "d" => Ok(Self::Dummy),
            _ => Err(FirewallError::InvalidRuleKind { kind: s.to_string() }),
        }
    }
}

/// Identity of a rule. Two entries never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub actor: ActorId,
    pub fingerprint: Fingerprint,
    pub kind: RuleKind,
}

impl RuleKey {
    pub fn new(actor: ActorId, fingerprint: Fingerprint, kind: RuleKind) -> Self {
        Self {
            actor,
            fingerprint,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Allowed executions counted against this rule
    pub calls: u64,
    /// Executions this rule prohibited
    pub banned: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    Utf8,
}

impl TextEncoding {
    pub fn code(self) -> u8 {
        match self {
            Self::Utf8 => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Utf8),
            _ => None,
        }
    }
}

/// Location of a rule's normalized text in the external text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRef {
    pub offset: u64,
    pub len: u32,
    pub encoding: TextEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_accepts_names_and_codes() {
        assert_eq!("whitelist".parse::<RuleKind>().unwrap(), RuleKind::Whitelist);
        assert_eq!("B".parse::<RuleKind>().unwrap(), RuleKind::Blacklist);
        assert!(matches!(
            "greylist".parse::<RuleKind>(),
            Err(FirewallError::InvalidRuleKind { .. })
        ));
        for kind in [RuleKind::Whitelist, RuleKind::Blacklist, RuleKind::Dummy] {
            assert_eq!(RuleKind::from_code(kind.code()), Some(kind));
        }
    }
}
