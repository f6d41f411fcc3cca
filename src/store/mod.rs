// SPDX-License-Identifier: Apache-2.0

//! Rule Store
//!
//! Bounded, lock-protected map from (actor, fingerprint, kind) to rule
//! entries with per-entry counters.

pub mod table;
pub mod types;

pub use table::{RuleEntry, RuleStore, RuleTable};
pub use types::{ActorId, Counters, RuleKey, RuleKind, TextEncoding, TextRef};
