// SPDX-License-Identifier: Apache-2.0

//! Rule Snapshot File
//!
//! Layout (little endian):
//!
//! ```text
//! header  : magic u32 | version u32 | count u32
//! record  : actor u32 | fingerprint u32 | kind u8 | encoding u8 | reserved [u8; 2]
//!           | calls u64 | banned u64 | text_len u32
//! text    : text_len bytes followed by NUL
//! ```
//!
//! A snapshot is all-or-nothing: any inconsistency discards the whole file.

use std::fs;
use std::io;
use std::path::Path;

use qore_fingerprint::Fingerprint;
use tracing::{info, warn};

use super::temp_path;
use crate::error::{FirewallError, FirewallResult};
use crate::store::{ActorId, Counters, RuleKey, RuleKind, TextEncoding};

pub const SNAPSHOT_MAGIC: u32 = 0x2014_0125;
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_BYTES: usize = 12;
const RECORD_BYTES: usize = 32;

/// One persisted rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRule {
    pub key: RuleKey,
    pub encoding: TextEncoding,
    pub counters: Counters,
    pub text: String,
}

pub fn encode(rules: &[SnapshotRule]) -> FirewallResult<Vec<u8>> {
    let count = u32::try_from(rules.len())
        .map_err(|_| FirewallError::persistence("too many rules for a snapshot"))?;
    let mut out = Vec::with_capacity(HEADER_BYTES + rules.len() * (RECORD_BYTES + 64));
    out.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());

    for rule in rules {
        let text_len = u32::try_from(rule.text.len())
            .map_err(|_| FirewallError::persistence("rule text too long for a snapshot"))?;
        out.extend_from_slice(&rule.key.actor.0.to_le_bytes());
        out.extend_from_slice(&rule.key.fingerprint.as_u32().to_le_bytes());
        out.push(rule.key.kind.code() as u8);
        out.push(rule.encoding.code());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&rule.counters.calls.to_le_bytes());
        out.extend_from_slice(&rule.counters.banned.to_le_bytes());
        out.extend_from_slice(&text_len.to_le_bytes());
        out.extend_from_slice(rule.text.as_bytes());
        out.push(0);
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<SnapshotRule>, String> {
    let magic = read_u32_at(bytes, 0, "magic")?;
    if magic != SNAPSHOT_MAGIC {
        return Err(format!("invalid magic {magic:#010X}"));
    }
    let version = read_u32_at(bytes, 4, "version")?;
    if version != SNAPSHOT_VERSION {
        return Err(format!(
            "unsupported version {version}, expected {SNAPSHOT_VERSION}"
        ));
    }
    let count = read_u32_at(bytes, 8, "count")? as usize;

    let mut rules = Vec::with_capacity(count.min(bytes.len() / RECORD_BYTES));
    let mut pos = HEADER_BYTES;
    for index in 0..count {
        let record = bytes
            .get(pos..pos + RECORD_BYTES)
            .ok_or_else(|| format!("record {index} is truncated"))?;

        let kind = RuleKind::from_code(record[8] as char)
            .filter(|k| k.is_real())
            .ok_or_else(|| format!("record {index} has invalid kind {:#04X}", record[8]))?;
        let encoding = TextEncoding::from_code(record[9])
            .ok_or_else(|| format!("record {index} has invalid encoding {}", record[9]))?;
        let text_len = read_u32_at(record, 28, "text_len")? as usize;

        let text_start = pos + RECORD_BYTES;
        let text_end = text_start
            .checked_add(text_len)
            .ok_or_else(|| format!("record {index} text length overflows"))?;
        if bytes.get(text_end) != Some(&0) {
            return Err(format!("record {index} text is not terminated"));
        }
        let text = std::str::from_utf8(&bytes[text_start..text_end])
            .map_err(|e| format!("record {index} text is not valid UTF-8: {e}"))?;

        rules.push(SnapshotRule {
            key: RuleKey::new(
                ActorId(read_u32_at(record, 0, "actor")?),
                Fingerprint::from_raw(read_u32_at(record, 4, "fingerprint")?),
                kind,
            ),
            encoding,
            counters: Counters {
                calls: read_u64_at(record, 12, "calls")?,
                banned: read_u64_at(record, 20, "banned")?,
            },
            text: text.to_string(),
        });
        pos = text_end + 1;
    }

    if pos != bytes.len() {
        return Err(format!("{} trailing bytes after last record", bytes.len() - pos));
    }
    Ok(rules)
}

/// Writes the snapshot to a temporary file and renames it into place.
pub fn write(path: &Path, rules: &[SnapshotRule]) -> FirewallResult<()> {
    let bytes = encode(rules)?;
    let tmp = temp_path(path);
    let result = fs::write(&tmp, &bytes).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(FirewallError::persistence(format!(
            "could not write rule file {}: {e}",
            path.display()
        )));
    }
    info!("Saved {} firewall rules to {}", rules.len(), path.display());
    Ok(())
}

/// Reads a snapshot. A missing file is empty; a damaged one is discarded.
pub fn read(path: &Path) -> Vec<SnapshotRule> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Could not read rule file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match decode(&bytes) {
        Ok(rules) => rules,
        Err(detail) => {
            warn!(
                "Ignoring invalid rule file {}: {}",
                path.display(),
                detail
            );
            Vec::new()
        }
    }
}

fn read_u32_at(bytes: &[u8], start: usize, field: &str) -> Result<u32, String> {
    let slice = bytes
        .get(start..start + 4)
        .ok_or_else(|| format!("field {field} out of bounds: start={start}, len={}", bytes.len()))?;
    let array: [u8; 4] = slice
        .try_into()
        .map_err(|_| format!("failed to parse field {field}"))?;
    Ok(u32::from_le_bytes(array))
}

fn read_u64_at(bytes: &[u8], start: usize, field: &str) -> Result<u64, String> {
    let slice = bytes
        .get(start..start + 8)
        .ok_or_else(|| format!("field {field} out of bounds: start={start}, len={}", bytes.len()))?;
    let array: [u8; 8] = slice
        .try_into()
        .map_err(|_| format!("failed to parse field {field}"))?;
    Ok(u64::from_le_bytes(array))
}
