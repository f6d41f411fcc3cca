// SPDX-License-Identifier: Apache-2.0

use proptest::prelude::*;
use qore_fingerprint::{identify, normalize, ConstLocation};

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

    #[test]
    fn literal_values_never_change_the_fingerprint(
        a in any::<i64>(),
        b in any::<i64>(),
        s in "[a-zA-Z0-9 ]{0,24}",
        t in "[a-zA-Z0-9 ]{0,24}",
    ) {
        let left = identify(&format!("SELECT id, name FROM users WHERE id = {a} AND name = '{s}'")).unwrap();
        let right = identify(&format!("SELECT id, name FROM users WHERE id = {b} AND name = '{t}'")).unwrap();
        prop_assert_eq!(left.fingerprint, right.fingerprint);
        prop_assert!(!left.fingerprint.is_none());
        prop_assert_eq!(&left.normalized, "SELECT id, name FROM users WHERE id = ? AND name = ?");
        prop_assert_eq!(left.normalized, right.normalized);
    }

    #[test]
    fn different_columns_give_different_fingerprints(
        left in "[a-z]{1,8}",
        right in "[a-z]{1,8}",
    ) {
        prop_assume!(left != right);
        let a = identify(&format!("SELECT c_{left} FROM t WHERE k = 1")).unwrap();
        let b = identify(&format!("SELECT c_{right} FROM t WHERE k = 1")).unwrap();
        prop_assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn normalize_never_panics_on_arbitrary_offsets(
        sql in "SELECT [a-z0-9', -]{0,40}",
        offsets in proptest::collection::vec(0usize..64, 0..6),
    ) {
        let constants = offsets
            .into_iter()
            .map(|offset| ConstLocation { offset, length: None })
            .collect::<Vec<_>>();
        let _ = normalize(&sql, &constants);
    }
}

#[test]
fn insert_variants_share_a_shape() {
    let a = identify("INSERT INTO orders (id, total) VALUES (1, 9.5)").unwrap();
    let b = identify("insert into ORDERS (id, total) values (77, -0.25)").unwrap();
    assert_eq!(a.fingerprint, b.fingerprint);
}

#[test]
fn tautology_changes_the_shape() {
    let a = identify("SELECT * FROM users WHERE name = 'x'").unwrap();
    let b = identify("SELECT * FROM users WHERE name = 'x' OR 1 = 1").unwrap();
    assert_ne!(a.fingerprint, b.fingerprint);
}
