// SPDX-License-Identifier: Apache-2.0

//! Decision Engine
//!
//! Matches a fingerprint against the rule lists and maps the outcome to a
//! decision for the current mode. Counters of the matched rule are bumped as
//! part of the lookup.

use qore_fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::mode::{Mode, Strategy};
use crate::store::{ActorId, RuleKind, RuleTable};

/// Outcome of evaluating one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Prohibited under permissive mode
    Warn,
    /// Prohibited under enforcing mode
    Deny,
    /// Learning mode found no whitelist rule for the actor
    Learn,
}

/// What the host sees for a statement that is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    WarnAndAllow,
}

pub fn decide(
    mode: Mode,
    strategy: Strategy,
    table: &RuleTable,
    actor: ActorId,
    fingerprint: Fingerprint,
) -> Decision {
    if fingerprint.is_none() {
        return Decision::Allow;
    }

    match mode {
        Mode::Disabled => Decision::Allow,
        Mode::Learning => {
            if table
                .lookup(actor, fingerprint, RuleKind::Whitelist)
                .is_some()
            {
                Decision::Allow
            } else {
                Decision::Learn
            }
        }
        Mode::Permissive => {
            if is_prohibited(table, actor, fingerprint, strategy) {
                Decision::Warn
            } else {
                Decision::Allow
            }
        }
        Mode::Enforcing => {
            if is_prohibited(table, actor, fingerprint, strategy) {
                Decision::Deny
            } else {
                Decision::Allow
            }
        }
    }
}

/// Whether the statement is prohibited under `strategy`.
///
/// Every lookup tries the exact actor first and falls back to the any-actor
/// scope. The hybrid strategy checks the blacklist before the whitelist, so
/// a blacklist match prohibits regardless of whitelist rules.
pub fn is_prohibited(table: &RuleTable, actor: ActorId, fingerprint: Fingerprint, strategy: Strategy) -> bool {
    let blacklisted = || match table.lookup(actor, fingerprint, RuleKind::Blacklist) {
        Some(entry) => {
            debug!(%actor, %fingerprint, scope = %entry.key().actor, "Blacklist match");
            entry.increment_banned();
            true
        }
        None => false,
    };
    let whitelisted = || match table.lookup(actor, fingerprint, RuleKind::Whitelist) {
        Some(entry) => {
            entry.increment_calls();
            true
        }
        None => false,
    };

    match strategy {
        Strategy::Whitelist => !whitelisted(),
        Strategy::Blacklist => blacklisted(),
        Strategy::Hybrid => blacklisted() || !whitelisted(),
    }
}
