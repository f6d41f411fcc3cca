// SPDX-License-Identifier: Apache-2.0

//! Persistence
//!
//! On-disk state lives in one data directory:
//! - the external query text file, recreated on every start
//! - the rule snapshot, written on shutdown and after rule administration
//! - the warning/error counters file
//!
//! Rule files can also be exchanged as CSV.

pub mod counters;
pub mod gc;
pub mod qtext;
pub mod rules_csv;
pub mod snapshot;

use std::path::{Path, PathBuf};

pub use qtext::{QueryTextFile, StoredText, TextBuffer};
pub use snapshot::{SnapshotRule, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

pub const QUERY_TEXT_FILE: &str = "sql_firewall_query_texts.stat";
pub const SNAPSHOT_FILE: &str = "sql_firewall_statements.stat";
pub const COUNTERS_FILE: &str = "sql_firewall.stat";

/// File locations inside the data directory
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn query_texts(&self) -> PathBuf {
        self.data_dir.join(QUERY_TEXT_FILE)
    }

    pub fn snapshot(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    pub fn counters(&self) -> PathBuf {
        self.data_dir.join(COUNTERS_FILE)
    }
}

/// `<path>.tmp`, the staging name for atomic replacement.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
