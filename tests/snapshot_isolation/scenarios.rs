//! End-to-end visibility scenarios

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn uncommitted_write_hidden_until_snapshot_includes_commit() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let t1 = t.begin();
    t.db.put("t", "a", t1, "x").unwrap();

    let t2 = t.begin();
    assert_eq!(t.get_str("t", "a", t2), None);

    let committed = t.db.commit_transaction(t1).unwrap();
    let commit_ts = committed.commit_timestamp.unwrap();
    assert!(commit_ts > t2.start_timestamp());

    // T2's snapshot predates the commit
    assert_eq!(t.get_str("t", "a", t2), None);

    let t3 = t.begin();
    assert!(t3.start_timestamp() > commit_ts);
    assert_eq!(t.get_str("t", "a", t3), Some("x".to_string()));
}

#[test]
fn own_writes_visible_under_every_isolation_level() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    for level in [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::Snapshot,
    ] {
        let txn = t.begin_with(TransactionOptions::new().with_isolation(level));
        let row = format!("row-{}", level);
        t.db.put("t", row.as_str(), txn, "mine").unwrap();
        assert_eq!(t.get_str("t", &row, txn), Some("mine".to_string()));

        t.db.delete("t", row.as_str(), txn).unwrap();
        assert_eq!(t.get_str("t", &row, txn), None);
        t.db.rollback_transaction(txn).unwrap();
    }
}

#[test]
fn rollback_hides_writes_from_everyone() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let early = t.begin_with(TransactionOptions::read_only().with_isolation(IsolationLevel::ReadUncommitted));
    let writer = t.begin();
    t.db.put("t", "a", writer, "doomed").unwrap();
    assert_eq!(t.get_str("t", "a", early), Some("doomed".to_string()));

    t.db.rollback_transaction(writer).unwrap();
    let late = t.begin();
    assert_eq!(t.get_str("t", "a", early), None);
    assert_eq!(t.get_str("t", "a", late), None);

    // Rolling back again is a no-op
    let again = t.db.rollback_transaction(writer).unwrap();
    assert_eq!(again.status, TxnStatus::RolledBack);
    assert!(matches!(
        t.db.commit_transaction(writer),
        Err(SiError::InvalidTransactionState { .. })
    ));
}

#[test]
fn overwrite_keeps_older_snapshot_stable() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let w1 = t.begin();
    t.db.put("t", "k", w1, "v1").unwrap();
    t.db.commit_transaction(w1).unwrap();

    let reader = t.begin();

    let w2 = t.begin();
    t.db.put("t", "k", w2, "v2").unwrap();
    t.db.commit_transaction(w2).unwrap();

    let w3 = t.begin();
    t.db.delete("t", "k", w3).unwrap();
    t.db.commit_transaction(w3).unwrap();

    assert_eq!(t.get_str("t", "k", reader), Some("v1".to_string()));
    let now = t.begin();
    assert_eq!(t.get_str("t", "k", now), None);
}

#[test]
fn concurrent_writers_conflict_and_retry_succeeds() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let a = t.begin();
    let b = t.begin();
    t.db.put("t", "row", a, "a").unwrap();
    let err = t.db.put("t", "row", b, "b").unwrap_err();
    assert!(matches!(err, SiError::WriteConflict { .. }));
    assert!(err.is_retryable());
    t.db.rollback_transaction(b).unwrap();
    t.db.commit_transaction(a).unwrap();

    // A fresh transaction started after the commit may overwrite
    let retry = t.begin();
    t.db.put("t", "row", retry, "b").unwrap();
    t.db.commit_transaction(retry).unwrap();

    let reader = t.begin();
    assert_eq!(t.get_str("t", "row", reader), Some("b".to_string()));
}

#[test]
fn scan_sees_one_consistent_snapshot_across_partitions() {
    let t = TestDb::in_memory();
    t.db
        .create_partition("t", TableKind::User, KeyRange::new("", "m"))
        .unwrap();
    t.db
        .create_partition("t", TableKind::User, KeyRange::new("m", ""))
        .unwrap();

    let seed = t.begin();
    for row in ["a", "f", "p", "x"] {
        t.db.put("t", row, seed, row).unwrap();
    }
    t.db.commit_transaction(seed).unwrap();

    let reader = t.begin();

    let mutate = t.begin();
    t.db.delete("t", "f", mutate).unwrap();
    t.db.put("t", "q", mutate, "q").unwrap();
    t.db.commit_transaction(mutate).unwrap();

    let rows: Vec<RowKey> = t
        .db
        .scan("t", "", "", reader)
        .unwrap()
        .into_iter()
        .map(|(row, _)| row)
        .collect();
    assert_eq!(
        rows,
        ["a", "f", "p", "x"].iter().map(|r| RowKey::from(*r)).collect::<Vec<_>>()
    );

    let after = t.begin();
    let rows: Vec<RowKey> = t
        .db
        .scan("t", "b", "", after)
        .unwrap()
        .into_iter()
        .map(|(row, _)| row)
        .collect();
    assert_eq!(
        rows,
        ["p", "q", "x"].iter().map(|r| RowKey::from(*r)).collect::<Vec<_>>()
    );
}

#[test]
fn closure_transaction_retries_conflicts() {
    let t = TestDb::in_memory();
    t.single_partition("t");

    let blocker = t.begin();
    t.db.put("t", "hot", blocker, "held").unwrap();

    let mut attempts = 0;
    let db = t.db.clone();
    let result = t.db.transaction_with_retry(
        TransactionOptions::new(),
        snapkv::RetryConfig::new().with_max_retries(3).with_base_delay_ms(1),
        |tx_db, txn| {
            attempts += 1;
            if attempts == 2 {
                db.rollback_transaction(blocker)?;
            }
            tx_db.put("t", "hot", txn, "mine")
        },
    );
    assert!(result.is_ok());
    assert!(attempts >= 2);

    let reader = t.begin();
    assert_eq!(t.get_str("t", "hot", reader), Some("mine".to_string()));
}

#[test]
fn writes_racing_a_commit_are_applied_or_rejected() {
    let t = TestDb::in_memory();
    let partition = t.single_partition("t");

    for round in 0..100 {
        let w = t.begin();
        let barrier = Arc::new(Barrier::new(2));
        let writer = {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut acknowledged = 0;
                for i in 0..50 {
                    match db.put("t", format!("r{:03}/{:02}", round, i).as_str(), w, "x") {
                        Ok(()) => acknowledged += 1,
                        Err(e) => {
                            assert!(
                                matches!(e, SiError::InvalidTransactionState { .. }),
                                "unexpected error: {}",
                                e
                            );
                            break;
                        }
                    }
                }
                acknowledged
            })
        };
        barrier.wait();
        t.db.commit_transaction(w).unwrap();
        let acknowledged = writer.join().unwrap();

        // Nothing is left buffered for a transaction that already committed
        assert!(!partition.pending_transactions().contains(&w));
        assert_eq!(partition.buffered_writes(w), 0);

        let reader = t.begin();
        let start = format!("r{:03}/", round);
        let end = format!("r{:03}0", round);
        let first = t.db.scan("t", start.as_str(), end.as_str(), reader).unwrap().len();
        let second = t.db.scan("t", start.as_str(), end.as_str(), reader).unwrap().len();
        assert_eq!(first, second);
        assert_eq!(first, acknowledged);
        t.db.commit_transaction(reader).unwrap();
    }
}
