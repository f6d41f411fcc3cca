// SPDX-License-Identifier: Apache-2.0
// QoreDB SQL firewall

//! Learns the statements each actor runs and blocks the ones it has not seen
//! before.
//!
//! Statements are identified by their fingerprint (see `qore_fingerprint`),
//! so rules apply to a statement shape regardless of literal values. The
//! [`Firewall`] facade is the entry point for hosts; everything under it is
//! exposed for hosts that need finer control.

pub mod actors;
pub mod config;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod observability;
pub mod persistence;
pub mod store;

pub use actors::{ActorDirectory, ActorRegistry};
pub use config::FirewallConfig;
pub use engine::{Mode, Strategy, Verdict};
pub use error::{FirewallError, FirewallResult, PROHIBITED_ERROR_CLASS};
pub use firewall::{Caller, Firewall, ObservedStatement, RuleFilter, RuleRow, StatementInput};
pub use qore_fingerprint::{Fingerprint, FingerprintError};
pub use store::{ActorId, Counters, RuleKind};
