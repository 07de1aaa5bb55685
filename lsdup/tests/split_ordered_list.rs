//! Concurrency tests for the split-ordered hash table.

use crossbeam_epoch::pin;
use crossbeam_utils::thread;
use lsdup::{Error, NonblockingMap, SplitOrderedList};
use rand::prelude::*;

const THREADS: u64 = 8;
const KEYS_PER_THREAD: u64 = 2_000;

#[test]
fn concurrent_distinct_inserts_are_all_kept() {
    let map = &SplitOrderedList::new();

    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move |_| {
                let mut keys: Vec<u64> = (0..KEYS_PER_THREAD).map(|k| k * THREADS + t).collect();
                keys.shuffle(&mut rand::thread_rng());
                for k in keys {
                    assert!(map.insert(&k, k + 1, &pin()).is_ok());
                }
            });
        }
    })
    .unwrap();

    assert_eq!(map.len() as u64, THREADS * KEYS_PER_THREAD);
    let guard = &pin();
    for k in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(map.lookup(&k, guard), Some(&(k + 1)));
    }
    assert_eq!(map.iter(guard).count() as u64, THREADS * KEYS_PER_THREAD);
}

#[test]
fn same_key_has_exactly_one_winner() {
    for round in 0..20u64 {
        let map = &SplitOrderedList::new();
        let winners: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    s.spawn(move |_| match map.insert(&round, t, &pin()) {
                        Ok(()) => 1,
                        Err(rejected) => {
                            assert!(matches!(rejected.kind, Error::AlreadyExists));
                            assert_eq!(rejected.into_inner(), t);
                            0
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        })
        .unwrap();
        assert_eq!(winners, 1);
        assert_eq!(map.len(), 1);
    }
}

#[test]
fn growth_keeps_every_payload() {
    let map = SplitOrderedList::new();
    let guard = &pin();
    let initial = map.buckets();
    for k in 0..10_000u64 {
        map.insert(&k, format!("file-{k}"), guard).unwrap();
    }
    assert!(map.buckets() > initial);
    for k in 0..10_000u64 {
        assert_eq!(map.lookup(&k, guard).map(String::as_str), Some(format!("file-{k}").as_str()));
    }
}

#[test]
fn concurrent_insert_lookup_delete() {
    let map = &SplitOrderedList::new();
    {
        let guard = &pin();
        for k in 0..THREADS * KEYS_PER_THREAD {
            map.insert(&k, k, guard).unwrap();
        }
    }

    // Half the threads delete their keys while the other half look theirs up.
    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move |_| {
                let mut keys: Vec<u64> = (0..KEYS_PER_THREAD).map(|k| k * THREADS + t).collect();
                keys.shuffle(&mut rand::thread_rng());
                for k in keys {
                    let guard = &pin();
                    if t % 2 == 0 {
                        assert_eq!(map.delete(&k, guard).ok(), Some(&k));
                    } else {
                        assert_eq!(map.lookup(&k, guard), Some(&k));
                    }
                }
            });
        }
    })
    .unwrap();

    assert_eq!(map.len() as u64, THREADS / 2 * KEYS_PER_THREAD);
    let guard = &pin();
    assert!(map.iter(guard).all(|(k, v)| k == *v && (k % THREADS) % 2 == 1));
}

#[test]
fn destroy_requires_empty_map() {
    let map = SplitOrderedList::new();
    for k in 0..100u64 {
        map.insert(&k, k, &pin()).unwrap();
    }

    let rejected = map.destroy().unwrap_err();
    assert!(matches!(rejected.kind, Error::NotEmpty));
    let map = rejected.into_inner();
    assert_eq!(map.len(), 100);

    let guard = pin();
    for k in 0..100u64 {
        map.delete(&k, &guard).unwrap();
    }
    drop(guard);
    assert!(map.destroy().is_ok());
}
