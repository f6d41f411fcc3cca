// SPDX-License-Identifier: Apache-2.0

//! Shared Engine State
//!
//! Mode and strategy are read once per statement from atomics, so an update
//! takes effect for the next decision. Everything else lives behind one small
//! mutex that is never held across I/O.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::mode::{Mode, Strategy};

/// Mean text length assumed before the first GC measures the real one.
pub const ASSUMED_TEXT_LEN: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SharedCounters {
    pub warning_count: u64,
    pub error_count: u64,
    /// Bytes reserved in the external text file
    pub extent: u64,
    /// Appends in progress
    pub writer_count: u32,
    /// Bumped whenever stored text offsets may have been invalidated
    pub gc_cycle: u64,
    pub mean_text_len: u64,
}

impl Default for SharedCounters {
    fn default() -> Self {
        Self {
            warning_count: 0,
            error_count: 0,
            extent: 0,
            writer_count: 0,
            gc_cycle: 0,
            mean_text_len: ASSUMED_TEXT_LEN,
        }
    }
}

/// Space reserved for one text append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub offset: u64,
    /// GC cycle observed while reserving
    pub gc_cycle: u64,
}

/// Marks an append in progress until dropped.
pub struct WriterGuard<'a> {
    state: &'a SharedState,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut counters = self.state.counters.lock();
        counters.writer_count = counters.writer_count.saturating_sub(1);
    }
}

#[derive(Debug)]
pub struct SharedState {
    mode: AtomicU8,
    strategy: AtomicU8,
    counters: Mutex<SharedCounters>,
}

impl SharedState {
    pub fn new(mode: Mode, strategy: Strategy) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            strategy: AtomicU8::new(strategy.to_u8()),
            counters: Mutex::new(SharedCounters::default()),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::from_u8(self.strategy.load(Ordering::Acquire))
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        self.strategy.store(strategy.to_u8(), Ordering::Release);
    }

    pub fn snapshot(&self) -> SharedCounters {
        *self.counters.lock()
    }

    // ==================== Statistics ====================

    pub fn record_warning(&self) {
        self.counters.lock().warning_count += 1;
    }

    pub fn record_error(&self) {
        self.counters.lock().error_count += 1;
    }

    pub fn warning_count(&self) -> u64 {
        self.counters.lock().warning_count
    }

    pub fn error_count(&self) -> u64 {
        self.counters.lock().error_count
    }

    pub fn reset_stats(&self) {
        let mut counters = self.counters.lock();
        counters.warning_count = 0;
        counters.error_count = 0;
    }

    pub fn restore_stats(&self, warnings: u64, errors: u64) {
        let mut counters = self.counters.lock();
        counters.warning_count = warnings;
        counters.error_count = errors;
    }

    // ==================== Text space ====================

    /// Reserves `len` bytes plus a terminator at the end of the text file.
    pub fn reserve(&self, len: usize) -> (Reservation, WriterGuard<'_>) {
        let mut counters = self.counters.lock();
        let offset = counters.extent;
        counters.extent += len as u64 + 1;
        counters.writer_count += 1;
        let reservation = Reservation {
            offset,
            gc_cycle: counters.gc_cycle,
        };
        drop(counters);
        (reservation, WriterGuard { state: self })
    }

    pub fn extent(&self) -> u64 {
        self.counters.lock().extent
    }

    pub fn gc_cycle(&self) -> u64 {
        self.counters.lock().gc_cycle
    }

    pub fn mean_text_len(&self) -> u64 {
        self.counters.lock().mean_text_len
    }

    /// Records the layout produced by a successful compaction.
    pub fn finish_gc(&self, extent: u64, entries: usize) {
        let mut counters = self.counters.lock();
        counters.extent = extent;
        counters.mean_text_len = if entries > 0 {
            extent / entries as u64
        } else {
            ASSUMED_TEXT_LEN
        };
        counters.gc_cycle += 1;
    }

    /// Invalidates outstanding offsets without changing the layout.
    pub fn bump_gc_cycle(&self) {
        self.counters.lock().gc_cycle += 1;
    }

    /// Forgets every stored text, as after a truncation.
    pub fn clear_text_space(&self) {
        let mut counters = self.counters.lock();
        counters.extent = 0;
        counters.gc_cycle += 1;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(Mode::default(), Strategy::default())
    }
}
