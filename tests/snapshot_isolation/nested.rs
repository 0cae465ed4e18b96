//! Nested and dependent transactions

use crate::common::*;

#[test]
fn dependent_child_writes_vanish_when_parent_rolls_back() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let parent = t.begin();
    let child = t.begin_with(TransactionOptions::new().with_parent(parent, true));
    t.db.put("t", "a", child, "from-child").unwrap();
    t.db.commit_transaction(child).unwrap();

    let observer = t.begin();
    assert_eq!(t.get_str("t", "a", observer), Some("from-child".to_string()));

    t.db.rollback_transaction(parent).unwrap();
    assert_eq!(t.get_str("t", "a", observer), None);
    let later = t.begin();
    assert_eq!(t.get_str("t", "a", later), None);
}

#[test]
fn independent_child_survives_parent_rollback() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let parent = t.begin();
    let child = t.begin_with(TransactionOptions::new().with_parent(parent, false));
    t.db.put("t", "a", child, "kept").unwrap();
    t.db.commit_transaction(child).unwrap();
    t.db.rollback_transaction(parent).unwrap();

    let later = t.begin();
    assert_eq!(t.get_str("t", "a", later), Some("kept".to_string()));
}

#[test]
fn child_sees_parent_writes_without_conflict() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let parent = t.begin();
    t.db.put("t", "a", parent, "p").unwrap();

    let child = t.begin_with(TransactionOptions::new().with_parent(parent, true));
    assert_eq!(t.get_str("t", "a", child), Some("p".to_string()));

    // Overwriting an ancestor's pending version is not a conflict
    t.db.put("t", "a", child, "c").unwrap();
    assert_eq!(t.get_str("t", "a", child), Some("c".to_string()));
}

#[test]
fn child_requires_active_parent() {
    let t = TestDb::in_memory();
    let parent = t.begin();
    t.db.commit_transaction(parent).unwrap();
    assert!(matches!(
        t.db.begin_transaction(TransactionOptions::new().with_parent(parent, true)),
        Err(SiError::InvalidTransactionState { .. })
    ));
}
