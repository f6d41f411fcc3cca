// SPDX-License-Identifier: Apache-2.0

//! Rule Table
//!
//! Bounded map from [`RuleKey`] to [`RuleEntry`]. The table sits behind a
//! store-wide reader/writer lock: decisions hold the read guard and touch
//! counters through each entry's own mutex, while insertion, deletion, reset
//! and text GC take the write guard.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use qore_fingerprint::Fingerprint;

use super::types::{ActorId, Counters, RuleKey, RuleKind, TextRef};
use crate::error::{FirewallError, FirewallResult};

#[derive(Debug)]
pub struct RuleEntry {
    key: RuleKey,
    counters: Mutex<Counters>,
    /// `None` once the text was lost by a failed GC pass
    text: Option<TextRef>,
    /// Set on entries created by learning mode
    sticky: bool,
}

impl RuleEntry {
    fn new(key: RuleKey, text: Option<TextRef>, sticky: bool) -> Self {
        Self {
            key,
            counters: Mutex::new(Counters::default()),
            text,
            sticky,
        }
    }

    pub fn key(&self) -> RuleKey {
        self.key
    }

    pub fn kind(&self) -> RuleKind {
        self.key.kind
    }

    pub fn counters(&self) -> Counters {
        *self.counters.lock()
    }

    pub fn increment_calls(&self) {
        self.counters.lock().calls += 1;
    }

    pub fn increment_banned(&self) {
        self.counters.lock().banned += 1;
    }

    pub fn set_counters(&self, counters: Counters) {
        *self.counters.lock() = counters;
    }

    pub fn text(&self) -> Option<TextRef> {
        self.text
    }

    pub fn set_text(&mut self, text: Option<TextRef>) {
        self.text = text;
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }
}

#[derive(Debug)]
pub struct RuleTable {
    entries: HashMap<RuleKey, RuleEntry>,
    max: usize,
}

impl RuleTable {
    pub fn new(max: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max.min(1024)),
            max,
        }
    }

    /// Exact actor first, then the any-actor scope.
    pub fn lookup(&self, actor: ActorId, fingerprint: Fingerprint, kind: RuleKind) -> Option<&RuleEntry> {
        if !actor.is_any() {
            if let Some(entry) = self.lookup_exact(actor, fingerprint, kind) {
                return Some(entry);
            }
        }
        self.lookup_exact(ActorId::ANY, fingerprint, kind)
    }

    /// Entries whose text was lost never match.
    pub fn lookup_exact(&self, actor: ActorId, fingerprint: Fingerprint, kind: RuleKind) -> Option<&RuleEntry> {
        self.entries
            .get(&RuleKey::new(actor, fingerprint, kind))
            .filter(|entry| entry.text.is_some())
    }

    pub fn get(&self, key: &RuleKey) -> Option<&RuleEntry> {
        self.entries.get(key)
    }

    /// Inserts a rule, or returns the existing entry for the key. An existing
    /// entry keeps its counters and only takes `text` if its own was lost.
    pub fn insert(&mut self, key: RuleKey, text: Option<TextRef>, sticky: bool) -> FirewallResult<&RuleEntry> {
        if !key.kind.is_real() {
            return Err(FirewallError::InvalidRuleKind {
                kind: key.kind.to_string(),
            });
        }

        let len = self.entries.len();
        match self.entries.entry(key) {
            Entry::Occupied(existing) => {
                let entry = existing.into_mut();
                if entry.text.is_none() {
                    entry.text = text;
                }
                Ok(entry)
            }
            Entry::Vacant(slot) => {
                if len >= self.max {
                    return Err(FirewallError::CapacityExceeded { max: self.max });
                }
                Ok(slot.insert(RuleEntry::new(key, text, sticky)))
            }
        }
    }

    pub fn remove(&mut self, key: &RuleKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RuleEntry> {
        self.entries.values_mut()
    }
}

/// Lock-protected rule table shared by all sessions
#[derive(Debug)]
pub struct RuleStore {
    table: RwLock<RuleTable>,
}

impl RuleStore {
    pub fn new(max: usize) -> Self {
        Self {
            table: RwLock::new(RuleTable::new(max)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RuleTable> {
        self.table.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, RuleTable> {
        self.table.write()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.table.read().get(key).is_some()
    }

    pub fn counters(&self, key: &RuleKey) -> Option<Counters> {
        self.table.read().get(key).map(RuleEntry::counters)
    }
}
