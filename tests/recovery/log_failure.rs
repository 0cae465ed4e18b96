//! Durable log append failures

use crate::common::*;
use std::sync::Arc;

#[test]
fn failed_append_marks_transaction_error_and_buffers_nothing() {
    let logs = Arc::new(FailingLogStore::new());
    let h = PartitionHarness::new(logs.clone());
    let p = h.create(1, KeyRange::unbounded());
    let txn = h.begin();

    p.put("a", txn, "kept").unwrap();
    logs.set_failing(true);
    let err = p.put("b", txn, "lost").unwrap_err();
    assert!(matches!(err, SiError::LogAppendFailure { partition, .. } if partition == PartitionId(1)));
    assert!(!err.is_retryable());

    let record = h.ctx.registry.fetch(txn).unwrap();
    assert_eq!(record.status, TxnStatus::Error);
    assert_eq!(p.metrics().log_failures, 1);

    // The write that failed was never acknowledged, and the failed
    // transaction's earlier writes are discarded
    assert_eq!(p.buffered_writes(txn), 0);
    assert_eq!(p.lock_stats().held_locks, 0);
    logs.set_failing(false);

    assert!(matches!(
        p.put("c", txn, "late"),
        Err(SiError::InvalidTransactionState { .. })
    ));
    assert!(matches!(
        h.ctx.registry.commit(txn),
        Err(SiError::InvalidTransactionState { .. })
    ));
    h.ctx.registry.rollback(txn).unwrap();
}

#[test]
fn error_transaction_writes_are_invisible() {
    let logs = Arc::new(FailingLogStore::new());
    let h = PartitionHarness::new(logs.clone());
    let p = h.create(1, KeyRange::unbounded());
    let failed = h.begin();
    p.put("a", failed, "x").unwrap();
    logs.set_failing(true);
    assert!(p.put("b", failed, "y").is_err());
    logs.set_failing(false);

    let reader = h.ctx
        .registry
        .begin(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadUncommitted))
        .unwrap()
        .id;
    assert_eq!(p.read(&RowKey::from("a"), reader).unwrap(), None);

    // A failed writer never blocks others
    let next = h.begin();
    p.put("a", next, "z").unwrap();
}

#[test]
fn other_transactions_unaffected_by_a_failed_append() {
    let logs = Arc::new(FailingLogStore::new());
    let h = PartitionHarness::new(logs.clone());
    let p = h.create(1, KeyRange::unbounded());
    let healthy = h.begin();
    let unlucky = h.begin();
    p.put("a", healthy, "ok").unwrap();

    logs.set_failing(true);
    assert!(p.put("b", unlucky, "no").is_err());
    logs.set_failing(false);

    assert_eq!(p.buffered_writes(healthy), 1);
    h.ctx.registry.commit(healthy).unwrap();
    p.complete_transaction(healthy).unwrap();
    let reader = h.begin();
    assert!(p.read(&RowKey::from("a"), reader).unwrap().is_some());
}
