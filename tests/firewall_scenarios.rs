// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use qore_firewall::{
    ActorId, ActorRegistry, Caller, Firewall, FirewallConfig, FirewallError, Mode, RuleFilter,
    RuleKind, Strategy, Verdict, PROHIBITED_ERROR_CLASS,
};

const ADMIN: Caller = Caller {
    actor: ActorId(1),
    superuser: true,
};

fn open(dir: &std::path::Path, max_rules: usize) -> (Firewall, Arc<ActorRegistry>) {
    let registry = Arc::new(ActorRegistry::new());
    registry.insert("postgres", ActorId(1)).unwrap();
    let mut config = FirewallConfig::with_data_dir(dir);
    config.max_rules = max_rules;
    let firewall = Firewall::open(config, registry.clone()).expect("firewall should open");
    (firewall, registry)
}

fn only_row(firewall: &Firewall) -> qore_firewall::RuleRow {
    let rows = firewall.rules(ADMIN, RuleFilter::All);
    assert_eq!(rows.len(), 1, "expected a single rule, got {rows:?}");
    rows.into_iter().next().unwrap()
}

#[test]
fn learned_rule_allows_same_shape_when_enforcing() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");

    firewall.set_strategy(Strategy::Whitelist);
    firewall.set_mode(Mode::Learning);
    assert_eq!(firewall.check(u, "SELECT * FROM t WHERE id = 1").unwrap(), Verdict::Allow);

    let learned = only_row(&firewall);
    assert_eq!(learned.actor, u);
    assert_eq!(learned.kind, RuleKind::Whitelist);
    assert_eq!(learned.calls, 0);

    firewall.set_mode(Mode::Enforcing);
    assert_eq!(firewall.check(u, "SELECT * FROM t WHERE id = 2").unwrap(), Verdict::Allow);
    assert_eq!(only_row(&firewall).calls, 1);

    let err = firewall.check(u, "SELECT * FROM t WHERE name = 'x'").unwrap_err();
    assert!(matches!(err, FirewallError::Prohibited { .. }));
    assert_eq!(firewall.error_count(), 1);
}

#[test]
fn blacklist_rule_denies_only_its_actor() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("U");
    let v = registry.register("V");

    firewall.set_strategy(Strategy::Blacklist);
    assert!(firewall
        .add_rule(ADMIN, "U", "UPDATE t SET x=1 WHERE id=5", RuleKind::Blacklist)
        .unwrap());
    firewall.set_mode(Mode::Enforcing);

    let denied = "UPDATE t SET x=2 WHERE id=7";
    let err = firewall.check(u, denied).unwrap_err();
    assert_eq!(err.class(), Some(PROHIBITED_ERROR_CLASS));
    assert_eq!(err.hint(), Some(format!("SQL statement : {denied}")));
    assert_eq!(err.to_string(), "Prohibited SQL statement - sql firewall violation");
    assert_eq!(only_row(&firewall).banned, 1);

    assert_eq!(firewall.check(v, denied).unwrap(), Verdict::Allow);
    assert_eq!(only_row(&firewall).banned, 1);
}

#[test]
fn hybrid_denies_when_both_lists_match() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");
    let sql = "DELETE FROM orders WHERE id = 10";

    firewall.add_rule(ADMIN, "u", sql, RuleKind::Whitelist).unwrap();
    firewall.add_rule(ADMIN, "u", sql, RuleKind::Blacklist).unwrap();
    firewall.set_strategy(Strategy::Hybrid);
    firewall.set_mode(Mode::Enforcing);

    for id in 0..3 {
        let attempt = format!("DELETE FROM orders WHERE id = {id}");
        assert!(firewall.check(u, &attempt).is_err());
    }
    let blacklisted = firewall.rules(ADMIN, RuleFilter::Blacklist);
    assert_eq!(blacklisted[0].banned, 3);
    assert_eq!(firewall.rules(ADMIN, RuleFilter::Whitelist)[0].calls, 0);
}

#[test]
fn actor_whitelist_rule_admits_only_that_actor() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let sql = "SELECT pin FROM accounts WHERE holder = 'a'";
    firewall.set_strategy(Strategy::Whitelist);
    firewall.set_mode(Mode::Enforcing);

    let fresh = registry.register("fresh");
    assert!(firewall.check(fresh, sql).is_err());

    firewall.set_mode(Mode::Disabled);
    firewall.add_rule(ADMIN, "fresh", sql, RuleKind::Whitelist).unwrap();
    firewall.set_mode(Mode::Enforcing);

    assert_eq!(firewall.check(fresh, sql).unwrap(), Verdict::Allow);
    let other = registry.register("other");
    assert!(firewall.check(other, sql).is_err());

    let row = firewall
        .rules(ADMIN, RuleFilter::Whitelist)
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(row.actor_name.as_deref(), Some("fresh"));
    assert!(!row.learned);
}

#[test]
fn hybrid_any_actor_blacklist_survives_actor_whitelist() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let sql = "SELECT pin FROM accounts WHERE holder = 'a'";
    firewall.add_rule(ADMIN, "", sql, RuleKind::Blacklist).unwrap();
    let fresh = registry.register("fresh");
    firewall.add_rule(ADMIN, "fresh", sql, RuleKind::Whitelist).unwrap();
    firewall.set_strategy(Strategy::Hybrid);
    firewall.set_mode(Mode::Enforcing);

    assert!(firewall.check(fresh, sql).is_err());
    assert_eq!(firewall.rules(ADMIN, RuleFilter::Blacklist)[0].banned, 1);
}

#[test]
fn learning_cannot_whitelist_around_any_actor_blacklist() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    firewall
        .add_rule(ADMIN, "", "DELETE FROM accounts WHERE id = 1", RuleKind::Blacklist)
        .unwrap();
    firewall.set_strategy(Strategy::Hybrid);
    let u = registry.register("u");

    firewall.set_mode(Mode::Learning);
    firewall.check(u, "DELETE FROM accounts WHERE id = 1").unwrap();
    firewall.set_mode(Mode::Enforcing);

    let err = firewall.check(u, "DELETE FROM accounts WHERE id = 2").unwrap_err();
    assert!(matches!(err, FirewallError::Prohibited { .. }));
}

#[test]
fn learned_rows_name_their_actor() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");
    firewall.add_rule(ADMIN, "", "SELECT 1", RuleKind::Whitelist).unwrap();
    firewall.set_mode(Mode::Learning);
    firewall.check(u, "SELECT a FROM t").unwrap();

    for row in firewall.rules(ADMIN, RuleFilter::All) {
        if row.actor == u {
            assert_eq!(row.actor_name.as_deref(), Some("u"));
            assert!(row.learned);
        } else {
            assert_eq!(row.actor_name, None);
            assert!(!row.learned);
        }
    }
}

#[test]
fn whitelist_strategy_falls_back_to_any_actor_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    firewall.add_rule(ADMIN, "", "SELECT 1", RuleKind::Whitelist).unwrap();
    firewall.set_strategy(Strategy::Whitelist);
    firewall.set_mode(Mode::Enforcing);

    let anyone = registry.register("anyone");
    assert_eq!(firewall.check(anyone, "SELECT 2").unwrap(), Verdict::Allow);
    assert!(firewall.check(anyone, "SELECT 'two'").is_err());
}

#[test]
fn permissive_mode_warns_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");
    firewall.set_strategy(Strategy::Whitelist);
    firewall.set_mode(Mode::Permissive);

    assert_eq!(firewall.check(u, "SELECT now()").unwrap(), Verdict::WarnAndAllow);
    assert_eq!(firewall.check(u, "SELECT now()").unwrap(), Verdict::WarnAndAllow);
    assert_eq!(firewall.warning_count(), 2);
    assert_eq!(firewall.error_count(), 0);
    assert_eq!(firewall.rule_count(), 0);

    assert!(matches!(
        firewall.reset_stats(Caller::user(u)),
        Err(FirewallError::InsufficientPrivilege { .. })
    ));
    firewall.reset_stats(ADMIN).unwrap();
    assert_eq!(firewall.warning_count(), 0);
}

#[test]
fn administration_requires_superuser_and_disabled_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");

    assert!(matches!(
        firewall.add_rule(Caller::user(u), "u", "SELECT 1", RuleKind::Whitelist),
        Err(FirewallError::InsufficientPrivilege { .. })
    ));
    assert!(matches!(
        firewall.add_rule(ADMIN, "u", "SELECT 1", RuleKind::Dummy),
        Err(FirewallError::InvalidRuleKind { .. })
    ));
    assert!(matches!(
        firewall.add_rule(ADMIN, "nobody", "SELECT 1", RuleKind::Whitelist),
        Err(FirewallError::UnknownActor { .. })
    ));

    for mode in [Mode::Learning, Mode::Permissive, Mode::Enforcing] {
        firewall.set_mode(mode);
        assert!(matches!(
            firewall.add_rule(ADMIN, "u", "SELECT 1", RuleKind::Whitelist),
            Err(FirewallError::WrongMode { .. })
        ));
        assert!(matches!(
            firewall.del_rule(ADMIN, "u", "SELECT 1", RuleKind::Whitelist),
            Err(FirewallError::WrongMode { .. })
        ));
        assert!(matches!(firewall.reset(ADMIN), Err(FirewallError::WrongMode { .. })));
    }
    assert_eq!(firewall.rule_count(), 0);
}

#[test]
fn add_rule_is_idempotent_and_del_rule_removes() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    registry.register("u");

    assert!(firewall.add_rule(ADMIN, "u", "SELECT a FROM t WHERE b = 1", RuleKind::Whitelist).unwrap());
    assert!(!firewall.add_rule(ADMIN, "u", "SELECT a FROM t WHERE b = 1", RuleKind::Whitelist).unwrap());
    assert_eq!(firewall.rule_count(), 1);
    assert_eq!(only_row(&firewall).query.as_deref(), Some("SELECT a FROM t WHERE b = ?"));

    assert!(firewall.del_rule(ADMIN, "u", "SELECT a FROM t WHERE b = 99", RuleKind::Whitelist).unwrap());
    assert!(!firewall.del_rule(ADMIN, "u", "SELECT a FROM t WHERE b = 99", RuleKind::Whitelist).unwrap());
    assert_eq!(firewall.rule_count(), 0);
}

#[test]
fn reset_clears_rules_and_texts() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, _) = open(dir.path(), 100);
    firewall.add_rule(ADMIN, "", "SELECT 1", RuleKind::Whitelist).unwrap();
    firewall.add_rule(ADMIN, "", "DROP TABLE t", RuleKind::Blacklist).unwrap();

    firewall.reset(ADMIN).unwrap();
    assert_eq!(firewall.rule_count(), 0);
    assert_eq!(firewall.shared_counters().extent, 0);
    assert!(matches!(firewall.reset(Caller::user(ActorId(5))), Err(FirewallError::InsufficientPrivilege { .. })));
}

#[test]
fn rule_view_masks_other_actors_for_non_superusers() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");
    registry.register("v");
    firewall.add_rule(ADMIN, "u", "SELECT 1", RuleKind::Whitelist).unwrap();
    firewall.add_rule(ADMIN, "v", "SELECT 2, 3", RuleKind::Whitelist).unwrap();

    let rows = firewall.rules(Caller::user(u), RuleFilter::All);
    assert_eq!(rows.len(), 2);
    for row in rows {
        if row.actor == u {
            assert!(row.fingerprint.is_some());
            assert_eq!(row.query.as_deref(), Some("SELECT ?"));
        } else {
            assert_eq!(row.fingerprint, None);
            assert_eq!(row.query.as_deref(), Some("<insufficient privilege>"));
        }
    }
}

#[test]
fn learning_stops_at_capacity_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 2);
    let u = registry.register("u");
    firewall.set_mode(Mode::Learning);

    for sql in ["SELECT a FROM t", "SELECT b FROM t", "SELECT c FROM t"] {
        assert_eq!(firewall.check(u, sql).unwrap(), Verdict::Allow);
    }
    assert_eq!(firewall.rule_count(), 2);
}

#[test]
fn concurrent_learning_creates_one_rule() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 100);
    let u = registry.register("u");
    firewall.set_mode(Mode::Learning);

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let firewall = &firewall;
            scope.spawn(move || {
                for i in 0..20 {
                    let sql = format!("SELECT * FROM t WHERE id = {}", worker * 100 + i);
                    firewall.check(u, &sql).unwrap();
                }
            });
        }
    });

    assert_eq!(firewall.rule_count(), 1);
    assert_eq!(firewall.shared_counters().writer_count, 0);
}

#[test]
fn text_file_is_compacted_while_learning() {
    let dir = tempfile::tempdir().unwrap();
    let (firewall, registry) = open(dir.path(), 1);
    let u = registry.register("u");
    firewall.set_mode(Mode::Learning);

    firewall.check(u, "SELECT kept FROM t WHERE id = 1").unwrap();
    for i in 0..100 {
        let sql = format!("SELECT column_with_a_rather_long_name_{i} FROM some_table WHERE id = {i}");
        firewall.check(u, &sql).unwrap();
    }

    let counters = firewall.shared_counters();
    assert!(counters.gc_cycle >= 1, "no compaction happened: {counters:?}");
    assert!(counters.extent < 100 * 60);
    assert_eq!(only_row(&firewall).query.as_deref(), Some("SELECT kept FROM t WHERE id = ?"));
}
