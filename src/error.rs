// SPDX-License-Identifier: Apache-2.0

//! Error types for the firewall.
//!
//! Policy denials, operator misuse and persistence faults all flow through
//! [`FirewallError`]. Persistence faults are normally logged and degraded
//! locally; they only reach callers from the explicit file operations.

use qore_fingerprint::FingerprintError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Mode;

/// Error class reported by hosts for a denied statement.
pub const PROHIBITED_ERROR_CLASS: &str = "prohibited statement";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FirewallError {
    #[error("Prohibited SQL statement - sql firewall violation")]
    Prohibited { statement: String },

    #[error("Only a superuser can {operation}")]
    InsufficientPrivilege { operation: String },

    #[error("{operation} is available only under the disabled mode (current mode: {mode})")]
    WrongMode { operation: String, mode: Mode },

    #[error("Invalid rule kind: {kind}")]
    InvalidRuleKind { kind: String },

    #[error("Unknown actor: {name}")]
    UnknownActor { name: String },

    #[error("Statement cannot be fingerprinted: {message}")]
    Fingerprint { message: String },

    #[error("Number of rules exceeded the limit of {max}")]
    CapacityExceeded { max: usize },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl FirewallError {
    pub fn prohibited(statement: impl Into<String>) -> Self {
        Self::Prohibited {
            statement: statement.into(),
        }
    }

    pub fn privilege(operation: impl Into<String>) -> Self {
        Self::InsufficientPrivilege {
            operation: operation.into(),
        }
    }

    pub fn wrong_mode(operation: impl Into<String>, mode: Mode) -> Self {
        Self::WrongMode {
            operation: operation.into(),
            mode,
        }
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence {
            message: msg.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: msg.into(),
        }
    }

    /// Hint attached to a denial, naming the offending statement.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Prohibited { statement } => Some(format!("SQL statement : {statement}")),
            _ => None,
        }
    }

    /// Host-facing error class, present for denials only.
    pub fn class(&self) -> Option<&'static str> {
        match self {
            Self::Prohibited { .. } => Some(PROHIBITED_ERROR_CLASS),
            _ => None,
        }
    }
}

impl From<FingerprintError> for FirewallError {
    fn from(err: FingerprintError) -> Self {
        Self::Fingerprint {
            message: err.to_string(),
        }
    }
}

pub type FirewallResult<T> = Result<T, FirewallError>;
