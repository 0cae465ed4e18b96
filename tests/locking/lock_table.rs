//! Lock manager behavior across threads

use crate::common::*;
use proptest::prelude::*;
use snapkv::LockManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn second_exclusive_caller_times_out_while_held() {
    let locks = Arc::new(LockManager::new(Duration::from_millis(50)));
    let row = RowKey::from("r");
    locks.acquire_exclusive_write_lock(&row, TxnId(1)).unwrap();

    let contender = {
        let locks = Arc::clone(&locks);
        let row = row.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = locks.acquire_exclusive_write_lock(&row, TxnId(2));
            (result, started.elapsed())
        })
    };
    let (result, waited) = contender.join().unwrap();
    assert!(matches!(result, Err(SiError::LockTimeout { txn: TxnId(2), .. })));
    assert!(waited >= Duration::from_millis(50));
    assert!(locks.is_held_by(&row, TxnId(1)));
}

#[test]
fn blocked_exclusive_caller_proceeds_after_release() {
    let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
    let row = RowKey::from("r");
    locks.acquire_exclusive_write_lock(&row, TxnId(1)).unwrap();

    let contender = {
        let locks = Arc::clone(&locks);
        let row = row.clone();
        thread::spawn(move || locks.acquire_exclusive_write_lock(&row, TxnId(2)))
    };

    // Wait until the contender is parked
    let deadline = Instant::now() + Duration::from_secs(2);
    while locks.stats().waiting_callers == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(locks.release_exclusive_write_lock(&row, TxnId(1)));
    contender.join().unwrap().unwrap();
    assert!(locks.is_held_by(&row, TxnId(2)));
    assert_eq!(locks.release_all(TxnId(2)), 1);
    assert_eq!(locks.stats().held_locks, 0);
}

#[test]
fn shared_holders_block_exclusive_but_not_each_other() {
    let locks = LockManager::new(Duration::from_millis(30));
    let row = RowKey::from("r");
    locks.acquire_shared_read_lock(&row, TxnId(1)).unwrap();
    locks.acquire_shared_read_lock(&row, TxnId(2)).unwrap();
    assert!(matches!(
        locks.acquire_exclusive_write_lock(&row, TxnId(3)),
        Err(SiError::LockTimeout { .. })
    ));
    assert_eq!(locks.stats().held_locks, 2);

    locks.release_shared_read_lock(&row, TxnId(1));
    locks.release_shared_read_lock(&row, TxnId(2));
    locks.acquire_exclusive_write_lock(&row, TxnId(3)).unwrap();
    assert!(matches!(
        locks.acquire_shared_read_lock(&row, TxnId(4)),
        Err(SiError::LockTimeout { .. })
    ));
}

fn hammer(threads: usize, rounds: usize) -> usize {
    let locks = Arc::new(LockManager::new(Duration::from_secs(10)));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));
    let row = RowKey::from("hot");

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let barrier = Arc::clone(&barrier);
            let row = row.clone();
            thread::spawn(move || {
                let txn = TxnId(i as u64 + 1);
                barrier.wait();
                for _ in 0..rounds {
                    locks.acquire_exclusive_write_lock(&row, txn).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    locks.release_exclusive_write_lock(&row, txn);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(locks.stats().held_locks, 0);
    max_inside.load(Ordering::SeqCst)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Exactly one exclusive holder at a time, whatever the thread count
    #[test]
    fn exclusive_lock_has_one_holder(threads in 2usize..8, rounds in 1usize..40) {
        prop_assert_eq!(hammer(threads, rounds), 1);
    }
}
