//! Restart of a file-backed database

use crate::common::*;
use std::fs::OpenOptions;
use std::io::Write;

fn log_path(t: &TestDb, id: PartitionId) -> std::path::PathBuf {
    t.dir
        .as_ref()
        .unwrap()
        .path()
        .join("logs")
        .join(format!("{:020}.plog", id.as_u64()))
}

#[test]
fn unresolved_writes_survive_restart() {
    let mut t = TestDb::on_disk("t");
    let pid = t.single_partition("t").id();

    let done = t.begin();
    t.db.put("t", "a", done, "committed").unwrap();
    t.db.commit_transaction(done).unwrap();

    let open = t.begin();
    t.db.put("t", "b", open, "pending").unwrap();
    t.db.delete("t", "a", open).unwrap();

    t.reopen();

    let partition = t.db.partition(pid).unwrap();
    assert_eq!(partition.state(), PartitionState::Open);
    assert_eq!(partition.pending_transactions(), vec![open]);
    assert_eq!(partition.buffered_writes(open), 2);

    // Still ACTIVE in the registry and still sees its own writes
    assert_eq!(t.db.transaction_status(open).unwrap().status, TxnStatus::Active);
    assert_eq!(t.get_str("t", "b", open), Some("pending".to_string()));
    assert_eq!(t.get_str("t", "a", open), None);

    let other = t.begin();
    assert_eq!(t.get_str("t", "a", other), Some("committed".to_string()));
    assert_eq!(t.get_str("t", "b", other), None);

    t.db.commit_transaction(open).unwrap();
    let after = t.begin();
    assert_eq!(t.get_str("t", "a", after), None);
    assert_eq!(t.get_str("t", "b", after), Some("pending".to_string()));
}

#[test]
fn transaction_ids_keep_increasing_across_restart() {
    let mut t = TestDb::on_disk("t");
    let before: Vec<TxnId> = (0..5).map(|_| t.begin()).collect();
    t.reopen();
    let after = t.begin();
    assert!(before.iter().all(|id| *id < after));
    assert_eq!(t.db.list_active_transactions().unwrap().len(), 6);
}

#[test]
fn commit_while_partition_closed_is_applied_on_reopen() {
    let t = TestDb::on_disk("t");
    let pid = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "a", txn, "x").unwrap();

    t.db.close_partition(pid).unwrap();
    // The closed partition cannot complete it now
    t.db.commit_transaction(txn).unwrap();

    let partition = t.db.reopen_partition(pid).unwrap();
    assert!(partition.pending_transactions().is_empty());
    let reader = t.begin();
    assert_eq!(t.get_str("t", "a", reader), Some("x".to_string()));
}

#[test]
fn rollback_while_partition_closed_is_discarded_on_reopen() {
    let t = TestDb::on_disk("t");
    let pid = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "a", txn, "x").unwrap();
    t.db.close_partition(pid).unwrap();
    t.db.rollback_transaction(txn).unwrap();

    let partition = t.db.reopen_partition(pid).unwrap();
    assert!(partition.pending_transactions().is_empty());
    assert_eq!(partition.metrics().discarded, 1);
}

#[test]
fn replaying_twice_restores_the_same_buffers() {
    let mut t = TestDb::on_disk("t");
    let pid = t.single_partition("t").id();
    let a = t.begin();
    let b = t.begin();
    t.db.put("t", "x", a, "1").unwrap();
    t.db.put("t", "y", b, "2").unwrap();
    t.db.put("t", "x2", a, "3").unwrap();

    t.reopen();
    let first: Vec<(TxnId, usize)> = {
        let p = t.db.partition(pid).unwrap();
        p.pending_transactions()
            .into_iter()
            .map(|id| (id, p.buffered_writes(id)))
            .collect()
    };
    t.reopen();
    let p = t.db.partition(pid).unwrap();
    let second: Vec<(TxnId, usize)> = p
        .pending_transactions()
        .into_iter()
        .map(|id| (id, p.buffered_writes(id)))
        .collect();
    assert_eq!(first, vec![(a, 2), (b, 1)]);
    assert_eq!(first, second);
}

#[test]
fn torn_log_tail_is_ignored_on_restart() {
    let mut t = TestDb::on_disk("t");
    let pid = t.single_partition("t").id();
    let txn = t.begin();
    t.db.put("t", "a", txn, "x").unwrap();
    t.db.shutdown().unwrap();

    // Half-written frame at the end of the log
    let mut file = OpenOptions::new().append(true).open(log_path(&t, pid)).unwrap();
    file.write_all(&[0x40, 0x00, 0x00, 0x00, 0x01, 0xAB]).unwrap();
    drop(file);

    t.reopen();
    let partition = t.db.partition(pid).unwrap();
    assert_eq!(partition.buffered_writes(txn), 1);

    // The truncated log accepts new appends
    t.db.put("t", "b", txn, "y").unwrap();
    t.reopen();
    assert_eq!(t.db.partition(pid).unwrap().buffered_writes(txn), 2);
}

#[test]
fn default_config_file_is_written_on_first_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    assert!(dir.path().join(snapkv::CONFIG_FILE_NAME).exists());
    assert_eq!(db.config(), &SnapConfig::default());
    db.shutdown().unwrap();

    // Edits to the file take effect on the next open
    std::fs::write(
        dir.path().join(snapkv::CONFIG_FILE_NAME),
        "durability = \"always\"\nreaper_interval_ms = 0\n",
    )
    .unwrap();
    drop(db);
    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.config().durability, "always");
    assert_eq!(db.config().reaper_interval_ms, 0);
}
