// SPDX-License-Identifier: Apache-2.0

//! Firewall engine: modes, strategies, shared state and the decision logic.

pub mod decision;
pub mod mode;
pub mod state;

pub use decision::{decide, is_prohibited, Decision, Verdict};
pub use mode::{Mode, Strategy};
pub use state::{Reservation, SharedCounters, SharedState, WriterGuard, ASSUMED_TEXT_LEN};
