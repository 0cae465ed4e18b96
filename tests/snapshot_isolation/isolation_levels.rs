//! Read isolation levels

use crate::common::*;

#[test]
fn read_committed_sees_later_commit_snapshot_does_not() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    // Both readers start before the writer
    let rc = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadCommitted));
    let snap = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::Snapshot));

    let t1 = t.begin();
    t.db.put("t", "b", t1, "y").unwrap();
    t.db.commit_transaction(t1).unwrap();

    assert_eq!(t.get_str("t", "b", rc), Some("y".to_string()));
    assert_eq!(t.get_str("t", "b", snap), None);

    // Neither reader's start timestamp moved
    assert_eq!(t.db.transaction_status(snap).unwrap().start_timestamp, snap.start_timestamp());
}

#[test]
fn only_read_uncommitted_sees_active_writers() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let writer = t.begin();
    t.db.put("t", "a", writer, "dirty").unwrap();

    let ru = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadUncommitted));
    let rc = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadCommitted));
    let si = t.begin_with(TransactionOptions::read_only());

    assert_eq!(t.get_str("t", "a", ru), Some("dirty".to_string()));
    assert_eq!(t.get_str("t", "a", rc), None);
    assert_eq!(t.get_str("t", "a", si), None);
}

#[test]
fn read_committed_reads_release_shared_locks() {
    let t = TestDb::in_memory();
    let partition = t.single_partition("t");

    let rc = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadCommitted));
    for row in ["a", "b", "c"] {
        assert_eq!(t.get_str("t", row, rc), None);
    }
    let stats = t.db.get_lock_manager_stats(partition.id()).unwrap();
    assert_eq!(stats.held_locks, 0);
    assert_eq!(stats.waiting_callers, 0);
}

#[test]
fn read_only_transaction_cannot_write() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    let ro = t.begin_with(TransactionOptions::read_only());
    assert!(matches!(
        t.db.put("t", "a", ro, "x"),
        Err(SiError::ReadOnlyTransaction { .. })
    ));
}

#[test]
fn finished_transaction_cannot_read() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    let txn = t.begin();
    t.db.commit_transaction(txn).unwrap();
    assert!(matches!(
        t.db.get("t", "a", txn),
        Err(SiError::InvalidTransactionState { .. })
    ));
    assert!(matches!(
        t.db.get("t", "a", TxnId(9_999)),
        Err(SiError::UnknownTransaction { .. })
    ));
}
