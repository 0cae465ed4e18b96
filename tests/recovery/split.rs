//! Partition split and the split-aware log

use crate::common::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn split_hands_each_child_its_half() {
    let t = TestDb::in_memory();
    let parent = t.single_partition("t");

    let left_txn = t.begin();
    let right_txn = t.begin();
    let both_txn = t.begin();
    t.db.put("t", "apple", left_txn, "1").unwrap();
    t.db.put("t", "zebra", right_txn, "2").unwrap();
    t.db.put("t", "cherry", both_txn, "3").unwrap();
    t.db.put("t", "melon", both_txn, "4").unwrap();

    let (left, right) = t.db.split_partition(parent.id(), &RowKey::from("m")).unwrap();
    assert_eq!(parent.state(), PartitionState::Closed);
    assert!(matches!(t.db.partition(parent.id()), Err(SiError::UnknownPartition(_))));

    let left = t.db.partition(left).unwrap();
    let right = t.db.partition(right).unwrap();
    assert_eq!(left.pending_transactions(), vec![left_txn, both_txn]);
    assert_eq!(right.pending_transactions(), vec![right_txn, both_txn]);
    assert_eq!(left.buffered_writes(both_txn), 1);
    assert_eq!(right.buffered_writes(both_txn), 1);

    // Split key belongs to the right child
    assert!(right.info().owns(&RowKey::from("m")));
    assert!(!left.info().owns(&RowKey::from("m")));

    // Writes route to the children and commits apply on both
    t.db.put("t", "banana", both_txn, "5").unwrap();
    t.db.commit_transaction(both_txn).unwrap();
    t.db.commit_transaction(left_txn).unwrap();
    t.db.rollback_transaction(right_txn).unwrap();

    let reader = t.begin();
    let rows: BTreeSet<RowKey> = t
        .db
        .scan("t", "", "", reader)
        .unwrap()
        .into_iter()
        .map(|(row, _)| row)
        .collect();
    let expected: BTreeSet<RowKey> = ["apple", "banana", "cherry", "melon"]
        .iter()
        .map(|r| RowKey::from(*r))
        .collect();
    assert_eq!(rows, expected);
}

#[test]
fn split_is_lossless_for_many_transactions() {
    let t = TestDb::in_memory();
    let parent = t.single_partition("t");

    let mut expected = Vec::new();
    for i in 0..20u8 {
        let txn = t.begin();
        for j in 0..5u8 {
            let row = RowKey::new(vec![b'a' + (i + j * 5) % 26, i, j]);
            t.db.write("t", row.clone(), txn, WriteOp::Put(vec![i, j])).unwrap();
            expected.push((txn, row));
        }
    }

    let split_key = RowKey::from("n");
    let (l, r) = t.db.split_partition(parent.id(), &split_key).unwrap();
    let left = t.db.partition(l).unwrap();
    let right = t.db.partition(r).unwrap();

    let left_total: usize = left
        .pending_transactions()
        .iter()
        .map(|id| left.buffered_writes(*id))
        .sum();
    let right_total: usize = right
        .pending_transactions()
        .iter()
        .map(|id| right.buffered_writes(*id))
        .sum();
    let expected_left = expected.iter().filter(|(_, row)| *row < split_key).count();
    assert_eq!(left_total, expected_left);
    assert_eq!(right_total, expected.len() - expected_left);
}

#[test]
fn retired_parent_refuses_requests() {
    let t = TestDb::in_memory();
    let parent = t.single_partition("t");
    let txn = t.begin();
    t.db.split_partition(parent.id(), &RowKey::from("m")).unwrap();

    // The retired parent refuses requests with a retryable error
    let err = parent.put("a", txn, "x").unwrap_err();
    assert!(matches!(err, SiError::PartitionNotServing { .. }));
    assert!(err.is_retryable());
    assert!(matches!(
        t.db.reopen_partition(parent.id()),
        Err(SiError::PartitionNotServing { .. })
    ));
}

#[test]
fn split_survives_restart() {
    let mut t = TestDb::on_disk("t");
    let parent = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "b", txn, "left").unwrap();
    t.db.put("t", "y", txn, "right").unwrap();
    let (l, r) = t.db.split_partition(parent, &RowKey::from("m")).unwrap();

    t.reopen();
    let ids: Vec<PartitionId> = t.db.partitions().iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![l, r]);
    assert!(t.db.catalog_entry(parent).unwrap().retired);
    assert_eq!(t.db.partition(l).unwrap().buffered_writes(txn), 1);
    assert_eq!(t.db.partition(r).unwrap().buffered_writes(txn), 1);

    t.db.commit_transaction(txn).unwrap();
    let reader = t.begin();
    assert_eq!(t.get_str("t", "b", reader), Some("left".to_string()));
    assert_eq!(t.get_str("t", "y", reader), Some("right".to_string()));
}

#[test]
fn child_missing_migrated_half_refuses_to_open() {
    let mut t = TestDb::on_disk("t");
    let parent = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "y", txn, "right").unwrap();
    let (l, r) = t.db.split_partition(parent, &RowKey::from("m")).unwrap();
    t.db.shutdown().unwrap();

    let log = t
        .dir
        .as_ref()
        .unwrap()
        .path()
        .join("logs")
        .join(format!("{:020}.plog", r.as_u64()));
    std::fs::remove_file(log).unwrap();

    t.reopen();
    // The healthy sibling serves; the broken child stays offline
    assert!(t.db.partition(l).is_ok());
    assert!(matches!(t.db.partition(r), Err(SiError::UnknownPartition(_))));
    assert!(matches!(
        t.db.reopen_partition(r),
        Err(SiError::SplitInconsistency { .. })
    ));
}

#[test]
fn scans_during_repeated_splits_are_complete_or_retryable() {
    let t = TestDb::in_memory();
    t.single_partition("t");
    t.db.transaction(TransactionOptions::new(), |db, txn| {
        for i in 0..200 {
            db.put("t", format!("row{:03}", i).as_str(), txn, "v")?;
        }
        Ok(())
    })
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let scanner = {
        let db = Arc::clone(&t.db);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let (mut complete, mut refused) = (0usize, 0usize);
            while !stop.load(Ordering::SeqCst) {
                let reader = db.begin_transaction(TransactionOptions::read_only()).unwrap().id;
                match db.scan("t", "", "", reader) {
                    Ok(rows) => {
                        assert_eq!(rows.len(), 200, "scan returned a partial result");
                        complete += 1;
                    }
                    Err(e) => {
                        assert!(e.is_retryable(), "non-retryable scan error: {}", e);
                        refused += 1;
                    }
                }
                match db.get("t", "row100", reader) {
                    Ok(value) => assert_eq!(value, Some(b"v".to_vec())),
                    Err(e) => assert!(e.is_retryable(), "non-retryable get error: {}", e),
                }
                db.rollback_transaction(reader).unwrap();
            }
            (complete, refused)
        })
    };

    // Peel one row off the right edge each time
    for i in 1..200 {
        let split_key = RowKey::from(format!("row{:03}", i).as_str());
        let owner = t.db.partition_for("t", &split_key).unwrap();
        t.db.split_partition(owner.id(), &split_key).unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let (complete, _refused) = scanner.join().unwrap();
    assert!(complete > 0);

    assert_eq!(t.db.partitions().len(), 200);
    let reader = t.begin();
    assert_eq!(t.db.scan("t", "", "", reader).unwrap().len(), 200);
}

#[test]
fn failed_split_cancels_its_boundary() {
    let logs = Arc::new(FailingLogStore::new());
    let h = PartitionHarness::new(logs.clone());
    let parent = h.create(1, KeyRange::unbounded());
    let txn = h.begin();
    parent.put("b", txn, "left").unwrap();
    parent.put("y", txn, "right").unwrap();

    logs.refuse_stream(PartitionId(3));
    assert!(parent.split(&RowKey::from("m"), PartitionId(2), PartitionId(3)).is_err());

    // The left child's log was created before the failure and is gone again
    assert_eq!(parent.state(), PartitionState::Open);
    assert!(!logs.exists(PartitionId(2)));
    assert!(!logs.exists(PartitionId(3)));
    let records = logs.read_stream(PartitionId(1)).unwrap().unwrap();
    assert!(matches!(
        records.last(),
        Some(LogRecord::SplitAborted { left, right })
            if *left == PartitionId(2) && *right == PartitionId(3)
    ));

    // Still serving, and replays as an ordinary partition
    parent.put("c", txn, "more").unwrap();
    parent.close().unwrap();
    let reopened = h.open(parent.info().clone()).unwrap();
    assert_eq!(reopened.state(), PartitionState::Open);
    assert_eq!(reopened.buffered_writes(txn), 3);

    // A later split with fresh ids goes through
    let (left, right) = reopened
        .split(&RowKey::from("m"), PartitionId(4), PartitionId(5))
        .unwrap();
    assert_eq!(h.open(left).unwrap().buffered_writes(txn), 2);
    assert_eq!(h.open(right).unwrap().buffered_writes(txn), 1);
}

#[test]
fn child_catches_commit_that_missed_it() {
    let h = PartitionHarness::new(Arc::new(MemoryLogStore::new()));
    let parent = h.create(1, KeyRange::unbounded());
    let txn = h.begin();
    parent.put("b", txn, "left").unwrap();
    parent.put("y", txn, "right").unwrap();
    let (left, _right) = parent
        .split(&RowKey::from("m"), PartitionId(2), PartitionId(3))
        .unwrap();

    let left = h.open(left).unwrap();
    assert_eq!(left.pending_transactions(), vec![txn]);

    // Committed in the registry while no partition could apply it
    h.ctx.registry.commit(txn).unwrap();
    assert_eq!(left.resolve_finished().unwrap(), 1);
    assert!(left.pending_transactions().is_empty());

    let reader = h.begin();
    let found = left.read(&RowKey::from("b"), reader).unwrap().unwrap();
    assert_eq!(found.value, b"left".to_vec());
}

#[test]
fn logs_without_catalog_entries_are_reclaimed_on_open() {
    let mut t = TestDb::on_disk("t");
    let parent = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "b", txn, "left").unwrap();
    t.db.split_partition(parent, &RowKey::from("m")).unwrap();
    t.db.shutdown().unwrap();

    let logs = t.dir.as_ref().unwrap().path().join("logs");
    let log_path = |id: u64| logs.join(format!("{:020}.plog", id));
    // A log left behind by a split that never reached the catalog
    std::fs::copy(log_path(parent.as_u64()), log_path(999)).unwrap();

    t.reopen();
    assert!(!log_path(999).exists());
    // Retired parents keep their log
    assert!(log_path(parent.as_u64()).exists());
    assert_eq!(t.db.partitions().len(), 2);
}
