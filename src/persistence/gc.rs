// SPDX-License-Identifier: Apache-2.0

//! Query text garbage collection.
//!
//! Deleted and superseded texts stay in the file until a compaction pass
//! rewrites it with only the texts live entries still reference. Callers hold
//! the rule table's write guard, so no appends race with the rewrite.

use tracing::{debug, warn};

use super::qtext::QueryTextFile;
use crate::engine::SharedState;
use crate::store::{RuleTable, TextRef};

/// Minimum file size per allowed rule before compaction is considered.
pub const MIN_BYTES_PER_RULE: u64 = 512;

/// Whether the text file has grown enough to be worth compacting.
pub fn need_gc(state: &SharedState, max_rules: usize) -> bool {
    let counters = state.snapshot();
    let max = max_rules as u64;

    if counters.extent < MIN_BYTES_PER_RULE.saturating_mul(max) {
        return false;
    }
    // Under twice the expected size the file is mostly live text.
    if counters.extent < counters.mean_text_len.saturating_mul(max).saturating_mul(2) {
        return false;
    }
    true
}

/// Compacts the text file if [`need_gc`] still holds.
///
/// Entries whose text cannot be read back lose it. If the rewrite itself
/// fails every entry loses its text. The GC cycle is bumped either way.
pub fn collect(table: &mut RuleTable, state: &SharedState, file: &QueryTextFile) {
    if !need_gc(state, table.capacity()) {
        return;
    }

    let Some(buffer) = file.load() else {
        invalidate_all(table, state);
        return;
    };

    let before = state.extent();
    let mut compacted = Vec::with_capacity(buffer.len().min(before as usize));
    let mut kept = 0usize;

    for entry in table.iter_mut() {
        let live = entry
            .text()
            .and_then(|text| buffer.fetch(text).map(|body| (text, body)));
        match live {
            Some((text, body)) => {
                let offset = compacted.len() as u64;
                compacted.extend_from_slice(body.as_bytes());
                compacted.push(0);
                entry.set_text(Some(TextRef { offset, ..text }));
                kept += 1;
            }
            None => entry.set_text(None),
        }
    }

    if let Err(e) = file.rewrite(&compacted) {
        warn!("Could not rewrite query text file {}: {}", file.path().display(), e);
        invalidate_all(table, state);
        return;
    }

    debug!(before, after = compacted.len(), kept, "Compacted query text file");
    state.finish_gc(compacted.len() as u64, kept);
}

fn invalidate_all(table: &mut RuleTable, state: &SharedState) {
    warn!("Query texts are no longer readable; all rule texts were dropped");
    for entry in table.iter_mut() {
        entry.set_text(None);
    }
    state.bump_gc_cycle();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ActorId, RuleKey, RuleKind};
    use qore_fingerprint::Fingerprint;

    #[test]
    fn threshold_needs_both_conditions() {
        let state = SharedState::default();
        let (_, guard) = state.reserve(600 * 4);
        drop(guard);
        // 2401 bytes for 4 rules: above 512/rule, below 2 * 1024 * 4.
        assert!(!need_gc(&state, 4));

        state.finish_gc(2401, 24);
        // mean is now 100 bytes: 2401 >= 800
        assert!(need_gc(&state, 4));
        assert!(!need_gc(&state, 5));
    }

    #[test]
    fn compaction_keeps_only_live_texts() {
        let dir = tempfile::tempdir().unwrap();
        let file = QueryTextFile::new(dir.path().join("texts.stat"));
        file.recreate().unwrap();
        let state = SharedState::default();
        let mut table = RuleTable::new(2);

        let filler = "x".repeat(2000);
        file.store(&state, &filler).unwrap();
        let live = file.store(&state, "SELECT ?").unwrap();

        let key = RuleKey::new(ActorId(1), Fingerprint::new(1), RuleKind::Whitelist);
        table.insert(key, Some(live.text_ref), false).unwrap();
        // Force the mean down so the threshold is met.
        state.finish_gc(state.extent(), 100);
        let cycle = state.gc_cycle();

        collect(&mut table, &state, &file);

        let text = table.get(&key).unwrap().text().unwrap();
        assert_eq!(text.offset, 0);
        assert_eq!(file.load().unwrap().fetch(text), Some("SELECT ?"));
        assert_eq!(state.extent(), 9);
        assert_eq!(state.gc_cycle(), cycle + 1);
    }

    fn insert_text(table: &mut RuleTable, id: u32, text: TextRef) -> RuleKey {
        let key = RuleKey::new(ActorId(id), Fingerprint::new(id), RuleKind::Whitelist);
        table.insert(key, Some(text), false).unwrap();
        key
    }

    #[test]
    fn compaction_preserves_every_surviving_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = QueryTextFile::new(dir.path().join("texts.stat"));
        file.recreate().unwrap();
        let state = SharedState::default();
        let mut table = RuleTable::new(4);

        let mut expected = Vec::new();
        for id in 1..=4u32 {
            file.store(&state, &"y".repeat(700)).unwrap();
            let text = format!("SELECT col_{id} FROM t WHERE id = ?");
            let stored = file.store(&state, &text).unwrap();
            expected.push((insert_text(&mut table, id, stored.text_ref), text));
        }
        state.finish_gc(state.extent(), 100);

        collect(&mut table, &state, &file);

        let buffer = file.load().unwrap();
        for (key, text) in &expected {
            let text_ref = table.get(key).unwrap().text().unwrap();
            assert_eq!(buffer.fetch(text_ref), Some(text.as_str()));
        }
        let live: usize = expected.iter().map(|(_, text)| text.len() + 1).sum();
        assert_eq!(buffer.len(), live);
    }

    #[test]
    fn failed_rewrite_drops_every_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = QueryTextFile::new(dir.path().join("texts.stat"));
        file.recreate().unwrap();
        let state = SharedState::default();
        let mut table = RuleTable::new(2);

        file.store(&state, &"z".repeat(2000)).unwrap();
        let first = file.store(&state, "SELECT ?").unwrap();
        let second = file.store(&state, "DELETE FROM t").unwrap();
        let keys = [
            insert_text(&mut table, 1, first.text_ref),
            insert_text(&mut table, 2, second.text_ref),
        ];
        state.finish_gc(state.extent(), 100);
        let cycle = state.gc_cycle();

        // Nothing to read back, and no directory to rewrite into.
        let gone = QueryTextFile::new(dir.path().join("missing").join("texts.stat"));
        collect(&mut table, &state, &gone);

        for key in &keys {
            assert_eq!(table.get(key).unwrap().text(), None);
        }
        assert_eq!(state.gc_cycle(), cycle + 1);
    }

    #[test]
    fn unreadable_file_drops_every_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = QueryTextFile::new(dir.path().join("texts.stat"));
        file.recreate().unwrap();
        let state = SharedState::default();
        let mut table = RuleTable::new(1);

        file.store(&state, &"z".repeat(2000)).unwrap();
        let stored = file.store(&state, "SELECT ?").unwrap();
        let key = insert_text(&mut table, 1, stored.text_ref);
        state.finish_gc(state.extent(), 100);
        let cycle = state.gc_cycle();

        // A directory cannot be read as a file.
        collect(&mut table, &state, &QueryTextFile::new(dir.path()));

        assert_eq!(table.get(&key).unwrap().text(), None);
        assert_eq!(state.gc_cycle(), cycle + 1);
    }
}

