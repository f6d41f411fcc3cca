// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while turning a statement into a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("Syntax error: {message}")]
    Syntax { message: String },

    #[error("Expected exactly one statement, found {count}")]
    StatementCount { count: usize },

    #[error("Unrecognized node kind in statement tree: {kind}")]
    UnrecognizedNode { kind: String },

    #[error("Statement nesting exceeds {depth} levels")]
    TooDeep { depth: usize },
}

impl FingerprintError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    pub fn unrecognized(kind: impl Into<String>) -> Self {
        Self::UnrecognizedNode { kind: kind.into() }
    }
}
