//! Concurrent writers through the partition write path

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_writers_on_one_row_have_one_winner() {
    let t = TestDb::in_memory();
    let partition = t.single_partition("t");
    let threads = 8;

    for round in 0..10 {
        let row = format!("row-{}", round);
        let txns: Vec<TxnId> = (0..threads).map(|_| t.begin()).collect();
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = txns
            .iter()
            .map(|&txn| {
                let db = Arc::clone(&t.db);
                let barrier = Arc::clone(&barrier);
                let row = row.clone();
                thread::spawn(move || {
                    barrier.wait();
                    db.put("t", row.as_str(), txn, txn.as_u64().to_string())
                })
            })
            .collect();
        let results: Vec<SiResult<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<TxnId> = txns
            .iter()
            .zip(&results)
            .filter(|(_, r)| r.is_ok())
            .map(|(txn, _)| *txn)
            .collect();
        assert_eq!(winners.len(), 1, "round {}: {:?}", round, results);
        for result in results.iter().filter(|r| r.is_err()) {
            let err = result.as_ref().unwrap_err();
            assert!(
                matches!(err, SiError::WriteConflict { .. } | SiError::LockTimeout { .. }),
                "unexpected error {}",
                err
            );
        }

        for &txn in &txns {
            if txn == winners[0] {
                t.db.commit_transaction(txn).unwrap();
            } else {
                t.db.rollback_transaction(txn).unwrap();
            }
        }
        let reader = t.begin();
        assert_eq!(t.get_str("t", &row, reader), Some(winners[0].as_u64().to_string()));
    }

    assert_eq!(t.db.get_lock_manager_stats(partition.id()).unwrap().held_locks, 0);
    assert!(partition.metrics().write_conflicts + partition.metrics().lock_timeouts >= 70);
}

#[test]
fn writers_on_distinct_rows_do_not_contend() {
    let t = TestDb::in_memory();
    let partition = t.single_partition("t");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txn = db.begin_transaction(TransactionOptions::new())?.id;
                barrier.wait();
                for j in 0..50 {
                    db.put("t", format!("t{}-{:03}", i, j).as_str(), txn, "v")?;
                }
                db.commit_transaction(txn).map(|_| ())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let reader = t.begin();
    assert_eq!(t.db.scan("t", "", "", reader).unwrap().len(), threads * 50);
    let metrics = partition.metrics();
    assert_eq!(metrics.write_conflicts, 0);
    assert_eq!(metrics.lock_timeouts, 0);
    assert!(partition.pending_transactions().is_empty());
}
