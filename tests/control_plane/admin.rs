//! Kill, list, stats and metrics

use crate::common::*;
use std::sync::Arc;

#[test]
fn kill_transaction_discards_its_writes() {
    let t = TestDb::in_memory();
    let p = t.single_partition("t");
    let victim = t.begin();
    t.db.put("t", "a", victim, "doomed").unwrap();
    assert_eq!(p.buffered_writes(victim), 1);

    let killed = t.db.kill_transaction(victim).unwrap();
    assert_eq!(killed.status, TxnStatus::RolledBack);
    assert!(p.pending_transactions().is_empty());
    assert!(matches!(
        t.db.put("t", "b", victim, "late"),
        Err(SiError::InvalidTransactionState { .. })
    ));
    assert_eq!(t.db.metrics().total_killed, 1);
}

#[test]
fn kill_committed_transaction_rejected() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    let txn = t.begin();
    t.db.put("t", "a", txn, "v").unwrap();
    t.db.commit_transaction(txn).unwrap();
    assert!(matches!(
        t.db.kill_transaction(txn),
        Err(SiError::InvalidTransactionState { .. })
    ));
}

#[test]
fn list_active_transactions_in_id_order() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    let a = t.begin();
    let b = t.begin();
    let c = t.begin();
    t.db.commit_transaction(b).unwrap();

    let ids: Vec<TxnId> = t
        .db
        .list_active_transactions()
        .unwrap()
        .into_iter()
        .map(|txn| txn.id)
        .collect();
    assert_eq!(ids, vec![a, c]);

    t.db.rollback_transaction(a).unwrap();
    t.db.rollback_transaction(c).unwrap();
    assert!(t.db.list_active_transactions().unwrap().is_empty());
}

#[test]
fn kill_stale_transactions_up_to_id() {
    let t = TestDb::in_memory();
    let p = t.single_partition("t");
    let old = t.begin();
    let older_committed = t.begin();
    let boundary = t.begin();
    let young = t.begin();
    t.db.put("t", "a", old, "x").unwrap();
    t.db.commit_transaction(older_committed).unwrap();

    let killed = t.db.kill_stale_transactions(boundary).unwrap();
    assert_eq!(killed, vec![old, boundary]);
    assert_eq!(t.db.transaction_status(young).unwrap().status, TxnStatus::Active);
    assert_eq!(
        t.db.transaction_status(older_committed).unwrap().status,
        TxnStatus::Committed
    );
    assert!(p.pending_transactions().is_empty());
}

#[test]
fn lock_stats_per_partition() {
    let t = TestDb::in_memory();
    let p = t.single_partition("t");
    let txn = t.begin();
    t.db.put("t", "a", txn, "v").unwrap();

    // Row locks are held only while a write is checked and buffered
    let stats = t.db.get_lock_manager_stats(p.id()).unwrap();
    assert_eq!(stats.held_locks, 0);
    assert_eq!(stats.waiting_callers, 0);

    assert!(matches!(
        t.db.get_lock_manager_stats(PartitionId(999)),
        Err(SiError::UnknownPartition(_))
    ));
}

#[test]
fn metrics_count_lifecycle_outcomes() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    let committed = t.begin();
    let rolled_back = t.begin();
    let killed = t.begin();
    let _open = t.begin();
    t.db.commit_transaction(committed).unwrap();
    t.db.rollback_transaction(rolled_back).unwrap();
    t.db.kill_transaction(killed).unwrap();

    let m = t.db.metrics();
    assert_eq!(m.total_started, 4);
    assert_eq!(m.total_committed, 1);
    assert_eq!(m.total_rolled_back, 1);
    assert_eq!(m.total_killed, 1);
    assert_eq!(m.total_reaped, 0);
    assert!((m.commit_rate() - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn registered_table_store_backs_new_partitions() {
    let t = TestDb::in_memory();
    let store = Arc::new(MemoryCellStore::new());
    t.db.register_table_store("events", store.clone()).unwrap();
    assert!(matches!(
        t.db.register_table_store("events", Arc::new(MemoryCellStore::new())),
        Err(SiError::Config(_))
    ));

    t.single_partition("events");
    let txn = t.begin();
    t.db.put("events", "e1", txn, "payload").unwrap();
    t.db.commit_transaction(txn).unwrap();
    assert_eq!(store.row_count(), 1);
    assert_eq!(store.versions(&RowKey::from("e1")).unwrap().len(), 1);
}

#[test]
fn overlapping_partitions_rejected() {
    let t = TestDb::in_memory();
    t.db
        .create_partition("t", TableKind::User, KeyRange::new("a", "m"))
        .unwrap();
    assert!(matches!(
        t.db.create_partition("t", TableKind::User, KeyRange::new("k", "z")),
        Err(SiError::Config(_))
    ));
    // Same range on another table is fine
    t.db
        .create_partition("u", TableKind::User, KeyRange::new("a", "m"))
        .unwrap();
    t.db
        .create_partition("t", TableKind::User, KeyRange::new("m", "z"))
        .unwrap();
}

#[test]
fn shutdown_refuses_new_transactions() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    t.db.shutdown().unwrap();
    t.db.shutdown().unwrap();
    assert!(t.db.begin_transaction(TransactionOptions::new()).is_err());
}
