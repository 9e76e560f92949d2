use std::sync::Arc;
use std::thread;

use less_pii::{EncryptionService, KeyLabel, RecordStore};

use crate::{key_manager, phone_column};

// ============================================================================
// Shared use across threads
// ============================================================================

#[test]
fn parallel_writers_and_searchers() {
    let col = Arc::new(phone_column(key_manager()));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let col = Arc::clone(&col);
            thread::spawn(move || {
                for i in 0..25 {
                    let id = format!("t{}-{:02}", t, i);
                    let phone = format!("+336{}{:07}", t, i);
                    col.write(&id, &phone).expect("write");
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().expect("writer thread");
    }

    let searchers: Vec<_> = (0..4)
        .map(|t| {
            let col = Arc::clone(&col);
            thread::spawn(move || {
                let found = col.find_partial(&format!("336{}", t)).expect("search");
                assert_eq!(found.matches.len(), 25);
                assert!(found.unavailable.is_empty());
            })
        })
        .collect();
    for handle in searchers {
        handle.join().expect("searcher thread");
    }
}

#[test]
fn rotation_during_writes_keeps_everything_readable() {
    let keys = key_manager();
    let col = Arc::new(phone_column(keys.clone()));

    let writer = {
        let col = Arc::clone(&col);
        thread::spawn(move || {
            for i in 0..50 {
                col.write(&format!("r{:02}", i), &format!("+3361{:07}", i))
                    .expect("write");
            }
        })
    };
    let rotator = {
        let keys = keys.clone();
        thread::spawn(move || {
            for _ in 0..5 {
                keys.rotate(KeyLabel::Encryption).expect("rotate");
                keys.rotate(KeyLabel::Index).expect("rotate");
                thread::yield_now();
            }
        })
    };
    writer.join().expect("writer thread");
    rotator.join().expect("rotator thread");

    for i in 0..50 {
        let expected = format!("+3361{:07}", i);
        assert_eq!(
            col.read(&format!("r{:02}", i)).unwrap().as_deref(),
            Some(expected.as_str())
        );
    }
    assert_eq!(col.find_partial("3361").unwrap().matches.len(), 50);

    let report = col.rebuild_indexes().unwrap();
    assert!(report.is_complete());
    assert_eq!(col.store().index_versions("phone").unwrap(), [5]);
}

#[test]
fn concurrent_encryption_never_repeats_a_nonce() {
    let svc = Arc::new(EncryptionService::new(key_manager()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                (0..200)
                    .map(|_| svc.encrypt(b"same", None).expect("encrypt").nonce)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut nonces = std::collections::HashSet::new();
    for handle in handles {
        for nonce in handle.join().expect("thread") {
            assert!(nonces.insert(nonce), "nonce reused");
        }
    }
    assert_eq!(nonces.len(), 1600);
}
