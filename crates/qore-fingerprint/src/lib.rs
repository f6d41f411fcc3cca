// SPDX-License-Identifier: Apache-2.0

//! Statement fingerprints for the QoreDB firewall.
//!
//! A fingerprint identifies the *shape* of a statement: two statements that
//! differ only in literal values hash to the same 32-bit id. The crate also
//! produces the normalized text shown to operators, where every literal is
//! replaced by `?`.
//!
//! The jumbler works on an owned tree ([`tree::Statement`]) so it does not
//! depend on any particular parser. [`sql`] adapts `sqlparser` output to that
//! tree.

pub mod error;
pub mod fingerprint;
pub mod jumble;
mod lexer;
pub mod normalize;
pub mod sql;
pub mod tree;

pub use error::FingerprintError;
pub use fingerprint::Fingerprint;
pub use jumble::{fingerprint, fingerprint_text, ConstLocation, Jumbled, JUMBLE_SIZE};
pub use normalize::normalize;
pub use sql::{identify, parse, Identified, ParsedSql};
