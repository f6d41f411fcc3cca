// SPDX-License-Identifier: Apache-2.0

//! CSV rule interchange.
//!
//! Headerless, six columns per record:
//! `actor_id,fingerprint,query,calls,banned,kind`. The kind is written as
//! its letter code. An empty fingerprint on import means "derive it from the
//! query text".

use std::path::Path;

use qore_fingerprint::Fingerprint;
use tracing::warn;

use crate::error::{FirewallError, FirewallResult};
use crate::store::{ActorId, Counters, RuleKind};

const COLUMNS: usize = 6;

/// One CSV record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRule {
    pub actor: ActorId,
    pub fingerprint: Option<Fingerprint>,
    pub text: String,
    pub counters: Counters,
    pub kind: RuleKind,
}

pub fn export(path: &Path, rules: &[CsvRule]) -> FirewallResult<()> {
    let to_error = |e: csv::Error| {
        FirewallError::persistence(format!("could not write rule export {}: {e}", path.display()))
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)
        .map_err(to_error)?;

    for rule in rules {
        writer
            .write_record([
                rule.actor.to_string(),
                rule.fingerprint.map(|f| f.to_string()).unwrap_or_default(),
                rule.text.clone(),
                rule.counters.calls.to_string(),
                rule.counters.banned.to_string(),
                rule.kind.code().to_string(),
            ])
            .map_err(to_error)?;
    }

    writer.flush().map_err(|e| {
        FirewallError::persistence(format!("could not write rule export {}: {e}", path.display()))
    })
}

/// Reads every well-formed record. Malformed records are logged and skipped.
pub fn read(path: &Path) -> FirewallResult<Vec<CsvRule>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            FirewallError::persistence(format!("could not open rule file {}: {e}", path.display()))
        })?;

    let mut rules = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable record {} in {}: {}", line, path.display(), e);
                continue;
            }
        };
        if record.len() != COLUMNS {
            warn!(
                "Skipping record {} in {}: expected {} columns, found {}",
                line,
                path.display(),
                COLUMNS,
                record.len()
            );
            continue;
        }
        match parse_record(&record) {
            Ok(rule) => rules.push(rule),
            Err(reason) => warn!("Skipping record {} in {}: {}", line, path.display(), reason),
        }
    }
    Ok(rules)
}

fn parse_record(record: &csv::StringRecord) -> Result<CsvRule, String> {
    let field = |i: usize| record.get(i).unwrap_or_default().trim();

    let actor = field(0)
        .parse::<u32>()
        .map_err(|e| format!("invalid actor id '{}': {e}", field(0)))?;
    let fingerprint = match field(1) {
        "" => None,
        raw => Some(Fingerprint::from_raw(
            raw.parse::<u32>()
                .map_err(|e| format!("invalid fingerprint '{raw}': {e}"))?,
        )),
    };
    let calls = field(3)
        .parse::<u64>()
        .map_err(|e| format!("invalid calls '{}': {e}", field(3)))?;
    let banned = field(4)
        .parse::<u64>()
        .map_err(|e| format!("invalid banned '{}': {e}", field(4)))?;
    let kind = field(5)
        .parse::<RuleKind>()
        .ok()
        .filter(|k| k.is_real())
        .ok_or_else(|| format!("invalid rule kind '{}'", field(5)))?;

    Ok(CsvRule {
        actor: ActorId(actor),
        fingerprint,
        text: record.get(2).unwrap_or_default().to_string(),
        counters: Counters { calls, banned },
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn export_quotes_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        let rules = vec![
            CsvRule {
                actor: ActorId(10),
                fingerprint: Some(Fingerprint::new(1234)),
                text: "SELECT a, b FROM t WHERE c = '\"x\"'".into(),
                counters: Counters { calls: 2, banned: 0 },
                kind: RuleKind::Whitelist,
            },
            CsvRule {
                actor: ActorId::ANY,
                fingerprint: Some(Fingerprint::new(99)),
                text: "DELETE FROM t".into(),
                counters: Counters { calls: 0, banned: 5 },
                kind: RuleKind::Blacklist,
            },
        ];
        export(&path, &rules).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "10,1234,\"SELECT a, b FROM t WHERE c = '\"\"x\"\"'\",2,0,w\n0,99,DELETE FROM t,0,5,b\n"
        );
        assert_eq!(read(&path).unwrap(), rules);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        fs::write(
            &path,
            "1,,SELECT 1,0,0,whitelist\n\
             2,5,too,few\n\
             3,6,SELECT 2,0,0,d\n\
             x,7,SELECT 3,0,0,b\n\
             4,8,\"multi\nline\",1,2,b\n",
        )
        .unwrap();

        let rules = read(&path).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].fingerprint, None);
        assert_eq!(rules[0].kind, RuleKind::Whitelist);
        assert_eq!(rules[1].text, "multi\nline");
        assert_eq!(rules[1].counters, Counters { calls: 1, banned: 2 });
    }
}
