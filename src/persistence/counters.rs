// SPDX-License-Identifier: Apache-2.0

//! Warning/error counters file: a single `"<warnings> <errors>"` line.

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use super::temp_path;
use crate::error::{FirewallError, FirewallResult};

/// Persisted statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredCounters {
    pub warnings: u64,
    pub errors: u64,
}

/// Reads the counters and removes the file. Missing or malformed files
/// yield zeroes.
pub fn take(path: &Path) -> StoredCounters {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return StoredCounters::default(),
        Err(e) => {
            warn!("Could not read counters file {}: {}", path.display(), e);
            return StoredCounters::default();
        }
    };

    let mut fields = content.split_whitespace().map(str::parse::<u64>);
    let counters = match (fields.next(), fields.next()) {
        (Some(Ok(warnings)), Some(Ok(errors))) => StoredCounters { warnings, errors },
        _ => {
            warn!("Ignoring malformed counters file {}", path.display());
            StoredCounters::default()
        }
    };

    if let Err(e) = fs::remove_file(path) {
        warn!("Could not remove counters file {}: {}", path.display(), e);
    }
    counters
}

pub fn write(path: &Path, counters: StoredCounters) -> FirewallResult<()> {
    let tmp = temp_path(path);
    let line = format!("{} {}", counters.warnings, counters.errors);
    fs::write(&tmp, line)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            FirewallError::persistence(format!(
                "could not write counters file {}: {e}",
                path.display()
            ))
        })
}
