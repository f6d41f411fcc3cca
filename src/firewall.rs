// SPDX-License-Identifier: Apache-2.0

//! SQL Firewall
//!
//! Ties the pieces together for an embedding host:
//! 1. Parse hook: fingerprint the statement and keep its literal locations
//! 2. Completion hook: decide, learn or deny under the current mode
//! 3. Operator surface: rule administration, rule files and statistics

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use qore_fingerprint::tree::Statement;
use qore_fingerprint::{
    fingerprint, fingerprint_text, identify, normalize, parse, ConstLocation, Fingerprint,
    ParsedSql,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::actors::{resolve_actor, ActorDirectory};
use crate::config::{FirewallConfig, CONFIG_FILE};
use crate::engine::{decide, Decision, Mode, SharedCounters, SharedState, Strategy, Verdict};
use crate::error::{FirewallError, FirewallResult};
use crate::persistence::rules_csv::{self, CsvRule};
use crate::persistence::snapshot::{self, SnapshotRule};
use crate::persistence::{counters, gc, QueryTextFile, StoragePaths, StoredText};
use crate::store::{ActorId, Counters, RuleKey, RuleKind, RuleStore, TextEncoding};

/// Text shown in place of rules the caller may not inspect.
pub const INSUFFICIENT_PRIVILEGE_TEXT: &str = "<insufficient privilege>";

/// Whoever invokes an operator function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub actor: ActorId,
    pub superuser: bool,
}

impl Caller {
    pub fn superuser(actor: ActorId) -> Self {
        Self {
            actor,
            superuser: true,
        }
    }

    pub fn user(actor: ActorId) -> Self {
        Self {
            actor,
            superuser: false,
        }
    }
}

/// What the host hands over once a statement is parsed
#[derive(Debug, Clone, Copy)]
pub enum StatementInput<'a> {
    /// Raw SQL, parsed here
    Sql(&'a str),
    /// A tree built by the host, with the text its offsets refer to
    Tree {
        tree: &'a Statement,
        source: &'a str,
    },
    /// A statement with no tree form, fingerprinted from its text
    Text(&'a str),
}

/// A fingerprinted statement waiting for its completion hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStatement {
    fingerprint: Fingerprint,
    source: String,
    constants: Vec<ConstLocation>,
}

impl ObservedStatement {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source text with every literal replaced by `?`.
    pub fn normalized(&self) -> String {
        if self.constants.is_empty() {
            return self.source.clone();
        }
        normalize(&self.source, &self.constants)
    }
}

/// Which lists the rule view shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleFilter {
    #[default]
    All,
    Whitelist,
    Blacklist,
}

impl RuleFilter {
    fn admits(self, kind: RuleKind) -> bool {
        match self {
            RuleFilter::All => true,
            RuleFilter::Whitelist => kind == RuleKind::Whitelist,
            RuleFilter::Blacklist => kind == RuleKind::Blacklist,
        }
    }
}

/// One row of the rule view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRow {
    pub actor: ActorId,
    /// `None` for the any-actor scope and for actors the directory no longer knows
    pub actor_name: Option<String>,
    /// Hidden from non-superusers for other actors' rules
    pub fingerprint: Option<Fingerprint>,
    /// `None` when the text is no longer available
    pub query: Option<String>,
    pub calls: u64,
    pub banned: u64,
    pub kind: RuleKind,
    /// Created by learning mode since the firewall was opened
    pub learned: bool,
}

pub struct Firewall {
    config: RwLock<FirewallConfig>,
    paths: StoragePaths,
    state: SharedState,
    rules: RuleStore,
    texts: QueryTextFile,
    actors: Arc<dyn ActorDirectory>,
}

impl Firewall {
    /// Opens the firewall over `config.data_dir`.
    ///
    /// Only an invalid configuration fails. Missing or damaged files on disk
    /// are logged and the firewall starts empty.
    pub fn open(config: FirewallConfig, actors: Arc<dyn ActorDirectory>) -> FirewallResult<Self> {
        config.validate()?;

        let paths = StoragePaths::new(&config.data_dir);
        if let Err(e) = fs::create_dir_all(&paths.data_dir) {
            warn!("Could not create firewall data directory {:?}: {}", paths.data_dir, e);
        }

        let texts = QueryTextFile::new(paths.query_texts());
        if let Err(e) = texts.recreate() {
            warn!("Query texts will not be stored: {}", e);
        }

        let firewall = Self {
            state: SharedState::new(config.mode, config.engine),
            rules: RuleStore::new(config.max_rules),
            config: RwLock::new(config),
            paths,
            texts,
            actors,
        };

        if firewall.saves() {
            firewall.restore_snapshot();
            let stored = counters::take(&firewall.paths.counters());
            firewall.state.restore_stats(stored.warnings, stored.errors);
        }

        info!(
            mode = %firewall.mode(),
            engine = %firewall.strategy(),
            rules = firewall.rules.len(),
            "SQL firewall opened"
        );
        Ok(firewall)
    }

    /// Persists rules and counters (when saving is on) and drops the text file.
    pub fn shutdown(&self) -> FirewallResult<()> {
        let result = if self.saves() {
            self.write_snapshot().and_then(|()| {
                counters::write(
                    &self.paths.counters(),
                    counters::StoredCounters {
                        warnings: self.state.warning_count(),
                        errors: self.state.error_count(),
                    },
                )
            })
        } else {
            Ok(())
        };
        self.texts.remove();
        info!("SQL firewall shut down");
        result
    }

    fn saves(&self) -> bool {
        self.config.read().save
    }

    // ==================== Configuration ====================

    pub fn config(&self) -> FirewallConfig {
        let mut config = self.config.read().clone();
        config.mode = self.state.mode();
        config.engine = self.state.strategy();
        config
    }

    /// Applies the reloadable settings. Capacity and persistence are fixed
    /// for the lifetime of the firewall.
    pub fn apply_config(&self, config: &FirewallConfig) -> FirewallResult<()> {
        config.validate()?;

        let mut current = self.config.write();
        if config.max_rules != current.max_rules || config.data_dir != current.data_dir {
            warn!("max_rules and data_dir changes take effect after a restart");
        }
        self.state.set_mode(config.mode);
        self.state.set_strategy(config.engine);
        current.mode = config.mode;
        current.engine = config.engine;
        info!(mode = %config.mode, engine = %config.engine, "Firewall configuration applied");
        Ok(())
    }

    /// Reloads `firewall.json` from the data directory, if present.
    pub fn load_config(&self) -> FirewallResult<()> {
        let path = self.paths.data_dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!("No firewall config file found, keeping current settings");
            return Ok(());
        }
        let config = FirewallConfig::load(&path)?;
        self.apply_config(&config)
    }

    /// Writes the current settings to `firewall.json` in the data directory.
    pub fn save_config(&self) -> FirewallResult<()> {
        self.config().save(&self.paths.data_dir.join(CONFIG_FILE))
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state.set_mode(mode);
        self.config.write().mode = mode;
        info!(%mode, "Firewall mode changed");
    }

    pub fn strategy(&self) -> Strategy {
        self.state.strategy()
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        self.state.set_strategy(strategy);
        self.config.write().engine = strategy;
        info!(engine = %strategy, "Firewall engine changed");
    }

    // ==================== Host hooks ====================

    /// Fingerprints a freshly parsed statement.
    pub fn on_statement_parsed(
        &self,
        actor: ActorId,
        input: StatementInput<'_>,
    ) -> FirewallResult<ObservedStatement> {
        let observed = match input {
            StatementInput::Sql(sql) => match parse(sql)? {
                ParsedSql::Tree(tree) => observe_tree(&tree, sql)?,
                ParsedSql::Utility => observe_text(sql),
                ParsedSql::Untracked => ObservedStatement {
                    fingerprint: Fingerprint::NONE,
                    source: sql.to_string(),
                    constants: Vec::new(),
                },
            },
            StatementInput::Tree { tree, source } => observe_tree(tree, source)?,
            StatementInput::Text(text) => observe_text(text),
        };
        trace!(%actor, fingerprint = %observed.fingerprint, "Statement fingerprinted");
        Ok(observed)
    }

    /// Judges a statement about to complete.
    ///
    /// Returns `Err(FirewallError::Prohibited)` when enforcing mode denies it.
    pub fn on_statement_complete(
        &self,
        actor: ActorId,
        statement: &ObservedStatement,
    ) -> FirewallResult<Verdict> {
        let fingerprint = statement.fingerprint;
        let mode = self.state.mode();
        if fingerprint.is_none() || mode == Mode::Disabled {
            return Ok(Verdict::Allow);
        }

        let decision = {
            let table = self.rules.read();
            decide(mode, self.state.strategy(), &table, actor, fingerprint)
        };

        match decision {
            Decision::Allow => Ok(Verdict::Allow),
            Decision::Learn => {
                self.learn(actor, statement);
                Ok(Verdict::Allow)
            }
            Decision::Warn => {
                self.state.record_warning();
                warn!(
                    %actor,
                    %fingerprint,
                    "Prohibited SQL statement - sql firewall violation. SQL statement : {}",
                    statement.source
                );
                Ok(Verdict::WarnAndAllow)
            }
            Decision::Deny => {
                self.state.record_error();
                info!(%actor, %fingerprint, "Denied prohibited SQL statement");
                Err(FirewallError::prohibited(statement.source.clone()))
            }
        }
    }

    /// Runs both hooks for one SQL statement.
    pub fn check(&self, actor: ActorId, sql: &str) -> FirewallResult<Verdict> {
        let observed = self.on_statement_parsed(actor, StatementInput::Sql(sql))?;
        self.on_statement_complete(actor, &observed)
    }

    /// Records a whitelist rule for a statement seen in learning mode.
    fn learn(&self, actor: ActorId, statement: &ObservedStatement) {
        let key = RuleKey::new(actor, statement.fingerprint, RuleKind::Whitelist);
        let text = statement.normalized();

        let (stored, do_gc) = {
            let table = self.rules.read();
            let stored = self.texts.store(&self.state, &text);
            (stored, gc::need_gc(&self.state, table.capacity()))
        };

        let mut table = self.rules.write();
        let stored = match self.still_current(stored, &text) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(%actor, "Could not learn statement: {}", e);
                return;
            }
        };

        match table.insert(key, Some(stored.text_ref), true) {
            Ok(_) => debug!(%actor, fingerprint = %key.fingerprint, "Learned whitelist rule"),
            Err(FirewallError::CapacityExceeded { max }) => {
                warn!(max, "Number of queries exceeded the max limit, statement not learned");
            }
            Err(e) => warn!(%actor, "Could not learn statement: {}", e),
        }

        if do_gc {
            gc::collect(&mut table, &self.state, &self.texts);
        }
    }

    /// Stores `text` again when a compaction ran after `stored` was written
    /// or the first append failed. Callers hold the table's write guard.
    fn still_current(
        &self,
        stored: FirewallResult<StoredText>,
        text: &str,
    ) -> FirewallResult<StoredText> {
        match stored {
            Ok(stored) if stored.gc_cycle == self.state.gc_cycle() => Ok(stored),
            _ => self.texts.store(&self.state, text),
        }
    }

    // ==================== Rule administration ====================

    fn require_admin(&self, caller: Caller, operation: &str) -> FirewallResult<()> {
        if !caller.superuser {
            return Err(FirewallError::privilege(operation));
        }
        let mode = self.state.mode();
        if mode != Mode::Disabled {
            return Err(FirewallError::wrong_mode(operation, mode));
        }
        Ok(())
    }

    fn require_real_kind(kind: RuleKind) -> FirewallResult<()> {
        if !kind.is_real() {
            return Err(FirewallError::InvalidRuleKind {
                kind: kind.to_string(),
            });
        }
        Ok(())
    }

    /// Adds a rule for `query` under `actor_name` (empty for any actor).
    /// Returns `false` when an identical rule already existed.
    pub fn add_rule(
        &self,
        caller: Caller,
        actor_name: &str,
        query: &str,
        kind: RuleKind,
    ) -> FirewallResult<bool> {
        self.require_admin(caller, "add a firewall rule")?;
        Self::require_real_kind(kind)?;

        let actor = resolve_actor(self.actors.as_ref(), actor_name)?;
        let identified = identify(query)?;
        let key = RuleKey::new(actor, identified.fingerprint, kind);
        let added = self.install(key, &identified.normalized, Counters::default())?;
        debug!(%actor, fingerprint = %key.fingerprint, %kind, added, "add_rule");

        self.persist_rules();
        Ok(added)
    }

    /// Deletes the rule matching `query`. Returns whether a rule was removed.
    pub fn del_rule(
        &self,
        caller: Caller,
        actor_name: &str,
        query: &str,
        kind: RuleKind,
    ) -> FirewallResult<bool> {
        self.require_admin(caller, "delete a firewall rule")?;
        Self::require_real_kind(kind)?;

        let actor = resolve_actor(self.actors.as_ref(), actor_name)?;
        let identified = identify(query)?;
        let key = RuleKey::new(actor, identified.fingerprint, kind);
        let removed = self.rules.write().remove(&key);
        debug!(%actor, fingerprint = %key.fingerprint, %kind, removed, "del_rule");

        self.persist_rules();
        Ok(removed)
    }

    /// Drops every rule and every stored text.
    pub fn reset(&self, caller: Caller) -> FirewallResult<()> {
        self.require_admin(caller, "reset the firewall rules")?;

        {
            let mut table = self.rules.write();
            table.clear();
            if let Err(e) = self.texts.truncate() {
                warn!("{}", e);
            }
            self.state.clear_text_space();
        }
        info!("All firewall rules removed");

        self.persist_rules();
        Ok(())
    }

    /// Inserts a rule with its text and counters unless the key exists. A
    /// rule that lost its text gets `text` back and keeps its counters.
    fn install(&self, key: RuleKey, text: &str, counters: Counters) -> FirewallResult<bool> {
        let mut table = self.rules.write();
        let existing = table.get(&key).map(|entry| entry.text().is_some());
        if existing == Some(true) {
            return Ok(false);
        }

        let stored = self.texts.store(&self.state, text)?;
        let entry = table.insert(key, Some(stored.text_ref), false)?;
        if existing.is_none() {
            entry.set_counters(counters);
        }
        Ok(existing.is_none())
    }

    // ==================== Rule view ====================

    /// Lists rules. Non-superusers see fingerprints and texts of their own
    /// rules only.
    pub fn rules(&self, caller: Caller, filter: RuleFilter) -> Vec<RuleRow> {
        // Load ahead of the guard unless an append is in flight.
        let before = self.state.snapshot();
        let mut buffer = if before.writer_count == 0 {
            self.texts.load()
        } else {
            None
        };

        let table = self.rules.read();
        let now = self.state.snapshot();
        if buffer.is_none() || now.extent != before.extent || now.gc_cycle != before.gc_cycle {
            buffer = self.texts.load();
        }

        table
            .iter()
            .filter(|entry| filter.admits(entry.kind()))
            .map(|entry| {
                let key = entry.key();
                let counters = entry.counters();
                let visible = caller.superuser || key.actor == caller.actor;
                let (fingerprint, query) = if visible {
                    let text = entry
                        .text()
                        .zip(buffer.as_ref())
                        .and_then(|(text, buffer)| buffer.fetch(text))
                        .map(str::to_string);
                    (Some(key.fingerprint), text)
                } else {
                    (None, Some(INSUFFICIENT_PRIVILEGE_TEXT.to_string()))
                };
                RuleRow {
                    actor: key.actor,
                    actor_name: if key.actor.is_any() {
                        None
                    } else {
                        self.actors.name_of(key.actor)
                    },
                    fingerprint,
                    query,
                    calls: counters.calls,
                    banned: counters.banned,
                    kind: key.kind,
                    learned: entry.is_sticky(),
                }
            })
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    // ==================== Rule files ====================

    /// Writes every rule with a readable text to `path` as CSV.
    pub fn export_rules(&self, caller: Caller, path: &Path) -> FirewallResult<usize> {
        self.require_admin(caller, "export firewall rules")?;

        let table = self.rules.read();
        let buffer = self
            .texts
            .load()
            .ok_or_else(|| FirewallError::persistence("query texts are unavailable"))?;

        let mut rows = Vec::with_capacity(table.len());
        for entry in table.iter() {
            let key = entry.key();
            let Some(text) = entry.text().and_then(|text| buffer.fetch(text)) else {
                warn!(actor = %key.actor, fingerprint = %key.fingerprint, "Skipping rule without text");
                continue;
            };
            rows.push(CsvRule {
                actor: key.actor,
                fingerprint: Some(key.fingerprint),
                text: text.to_string(),
                counters: entry.counters(),
                kind: key.kind,
            });
        }
        drop(table);

        rules_csv::export(path, &rows)?;
        info!("Exported {} firewall rules to {}", rows.len(), path.display());
        Ok(rows.len())
    }

    /// Loads rules from a CSV file. Records without a fingerprint are
    /// identified from their query text. Returns the number of new rules.
    pub fn import_rules(&self, caller: Caller, path: &Path) -> FirewallResult<usize> {
        self.require_admin(caller, "import firewall rules")?;
        if !path.is_file() {
            return Err(FirewallError::persistence(format!(
                "\"{}\" is not a regular file",
                path.display()
            )));
        }

        let mut added = 0;
        for rule in rules_csv::read(path)? {
            let (fingerprint, text) = match rule.fingerprint {
                Some(fingerprint) => (fingerprint, rule.text),
                None => match identify(&rule.text) {
                    Ok(identified) => (identified.fingerprint, identified.normalized),
                    Err(e) => {
                        warn!("Skipping imported rule '{}': {}", rule.text, e);
                        continue;
                    }
                },
            };
            if fingerprint.is_none() {
                warn!("Skipping imported rule '{}': statement is never tracked", text);
                continue;
            }

            let key = RuleKey::new(rule.actor, fingerprint, rule.kind);
            match self.install(key, &text, rule.counters) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(FirewallError::CapacityExceeded { max }) => {
                    warn!(max, "Number of queries exceeded the max limit, import stopped");
                    break;
                }
                Err(e) => warn!(actor = %key.actor, "Skipping imported rule: {}", e),
            }
        }

        info!("Imported {} firewall rules from {}", added, path.display());
        self.persist_rules();
        Ok(added)
    }

    // ==================== Statistics ====================

    pub fn warning_count(&self) -> u64 {
        self.state.warning_count()
    }

    pub fn error_count(&self) -> u64 {
        self.state.error_count()
    }

    pub fn reset_stats(&self, caller: Caller) -> FirewallResult<()> {
        if !caller.superuser {
            return Err(FirewallError::privilege("reset firewall statistics"));
        }
        self.state.reset_stats();
        Ok(())
    }

    /// Engine counters, for diagnostics
    pub fn shared_counters(&self) -> SharedCounters {
        self.state.snapshot()
    }

    // ==================== Snapshot ====================

    fn snapshot_rules(&self) -> FirewallResult<Vec<SnapshotRule>> {
        let table = self.rules.read();
        let buffer = self
            .texts
            .load()
            .ok_or_else(|| FirewallError::persistence("query texts are unavailable"))?;

        Ok(table
            .iter()
            .filter_map(|entry| {
                let text = entry.text().and_then(|text| buffer.fetch(text))?;
                Some(SnapshotRule {
                    key: entry.key(),
                    encoding: TextEncoding::Utf8,
                    counters: entry.counters(),
                    text: text.to_string(),
                })
            })
            .collect())
    }

    fn write_snapshot(&self) -> FirewallResult<()> {
        let rules = self.snapshot_rules()?;
        snapshot::write(&self.paths.snapshot(), &rules)
    }

    /// Saves the rule file after an administrative change.
    fn persist_rules(&self) {
        if !self.saves() {
            return;
        }
        if let Err(e) = self.write_snapshot() {
            warn!("Could not save firewall rules: {}", e);
        }
    }

    fn restore_snapshot(&self) {
        let mut restored = 0;
        for rule in snapshot::read(&self.paths.snapshot()) {
            match self.install(rule.key, &rule.text, rule.counters) {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(FirewallError::CapacityExceeded { max }) => {
                    warn!(max, "Rule file holds more rules than allowed, the rest were dropped");
                    break;
                }
                Err(e) => warn!(actor = %rule.key.actor, "Could not restore rule: {}", e),
            }
        }
        if restored > 0 {
            info!("Restored {} firewall rules", restored);
        }
    }
}

fn observe_tree(tree: &Statement, source: &str) -> FirewallResult<ObservedStatement> {
    let jumbled = fingerprint(tree)?;
    Ok(ObservedStatement {
        fingerprint: jumbled.fingerprint,
        source: source.to_string(),
        constants: jumbled.constants,
    })
}

fn observe_text(text: &str) -> ObservedStatement {
    ObservedStatement {
        fingerprint: fingerprint_text(text),
        source: text.to_string(),
        constants: Vec::new(),
    }
}
