use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aura_auth::{SceneState, SceneStore};

const TTL: Duration = Duration::from_secs(600);

#[test]
fn never_scanned_scenes_stay_pending_forever() {
    let store = SceneStore::new();
    let t0 = Instant::now();
    for i in 0..50u32 {
        store.create_scene(&format!("{}", 100_000 + i), t0, TTL);
    }

    store.mark_scanned("999999", "ext_other", t0);

    for i in 0..50u32 {
        let session = store.get(&format!("{}", 100_000 + i)).unwrap();
        assert_eq!(session.state, SceneState::Pending);
        assert_eq!(session.external_identity, None);
    }
}

#[test]
fn repeated_scans_are_idempotent_and_last_write_wins() {
    let store = SceneStore::new();
    let t0 = Instant::now();
    store.create_scene("482913", t0, TTL);

    for _ in 0..10 {
        store.mark_scanned("482913", "ext_42", t0);
    }
    let session = store.get("482913").unwrap();
    assert_eq!(session.state, SceneState::Scanned);
    assert_eq!(session.external_identity.as_deref(), Some("ext_42"));

    store.mark_scanned("482913", "ext_43", t0);
    assert_eq!(
        store.get("482913").unwrap().external_identity.as_deref(),
        Some("ext_43")
    );
}

#[test]
fn expiry_evicts_regardless_of_state() {
    let store = SceneStore::new();
    let t0 = Instant::now();
    store.create_scene("111111", t0, TTL);
    store.create_scene("222222", t0, TTL);
    store.mark_scanned("222222", "ext_1", t0);

    let late = t0 + TTL + Duration::from_secs(1);
    store.evict_expired(late, TTL);

    assert!(store.get("111111").is_none());
    assert!(store.get("222222").is_none());
}

/// Readers never observe a scanned record without its identity, no matter
/// how scans and reads interleave across threads.
#[test]
fn concurrent_scans_and_reads_see_consistent_records() {
    let store = Arc::new(SceneStore::new());
    let t0 = Instant::now();
    for i in 0..8u32 {
        store.create_scene(&format!("{}", 100_000 + i), t0, TTL);
    }

    let mut handles = Vec::new();
    for worker in 0..8u32 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let scene_id = format!("{}", 100_000 + worker);
            for round in 0..200u32 {
                store.mark_scanned(&scene_id, &format!("ext_{worker}_{round}"), t0);
                for probe in 0..8u32 {
                    if let Some(session) = store.get(&format!("{}", 100_000 + probe)) {
                        if session.state == SceneState::Scanned {
                            assert!(session.external_identity.is_some());
                        } else {
                            assert!(session.external_identity.is_none());
                        }
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..8u32 {
        let session = store.get(&format!("{}", 100_000 + worker)).unwrap();
        assert_eq!(session.state, SceneState::Scanned);
        let identity = session.external_identity.unwrap();
        assert!(identity.starts_with(&format!("ext_{worker}_")));
    }
}
