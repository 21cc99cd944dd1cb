// Testing library/framework: Rust built-in test framework with Tokio where
// async is involved.
//
// These tests exercise the same-host exclusion contract at the store level:
// two sessions sharing one lock directory can never both claim an issue.

use std::sync::Arc;

use corral::config::RepoSpec;
use corral::coordination::locks::{LockError, LockStore};
use corral::coordination::process::StaticProcessProbe;
use tempfile::TempDir;

fn store_for(dir: &TempDir) -> LockStore {
    LockStore::new(
        dir.path().to_path_buf(),
        Arc::new(StaticProcessProbe::with_alive([std::process::id()])),
    )
}

fn repo() -> RepoSpec {
    RepoSpec::parse("acme/widgets").unwrap()
}

/// Walk candidates in priority order and claim the first available one,
/// the way select_next_issue walks its ranked backlog.
fn select_first_available(
    store: &LockStore,
    candidates: &[u64],
    session: &str,
) -> Option<u64> {
    for &number in candidates {
        match store.acquire(&repo(), number, session) {
            Ok(_) => return Some(number),
            Err(LockError::Held { .. }) => continue,
            Err(e) => panic!("unexpected lock error: {e:?}"),
        }
    }
    None
}

#[test]
fn two_sessions_never_claim_the_same_issue() {
    let dir = TempDir::new().unwrap();
    let store_a = store_for(&dir);
    let store_b = store_for(&dir);

    // Priority order says both sessions want #41 first, then #42.
    let picked_a = select_first_available(&store_a, &[41, 42], "session-a").unwrap();
    let picked_b = select_first_available(&store_b, &[41, 42], "session-b").unwrap();

    assert_ne!(picked_a, picked_b);
    assert_eq!(
        {
            let mut both = vec![picked_a, picked_b];
            both.sort();
            both
        },
        vec![41, 42]
    );

    // Two lock files exist, one per session.
    let entries = store_a.list().unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn concurrent_acquirers_race_to_one_winner() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = LockStore::new(
                    path,
                    Arc::new(StaticProcessProbe::with_alive([std::process::id()])),
                );
                store
                    .acquire(&repo(), 7, &format!("session-{i}"))
                    .map(|r| r.session_id)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one acquirer may win the race");
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, LockError::Held { .. }));
        }
    }
}

#[test]
fn exhausted_backlog_reports_no_pick() {
    let dir = TempDir::new().unwrap();
    let store = store_for(&dir);
    store.acquire(&repo(), 41, "session-a").unwrap();
    store.acquire(&repo(), 42, "session-a").unwrap();

    assert_eq!(
        select_first_available(&store, &[41, 42], "session-b"),
        None
    );
}

#[test]
fn stale_claims_do_not_block_selection() {
    let dir = TempDir::new().unwrap();
    // Session A's pid is not alive according to the probe, so its claims
    // read stale and get displaced.
    let dead_probe_store = LockStore::new(
        dir.path().to_path_buf(),
        Arc::new(StaticProcessProbe::default()),
    );
    dead_probe_store.acquire(&repo(), 41, "session-a").unwrap();

    let picked = select_first_available(&dead_probe_store, &[41, 42], "session-b");
    assert_eq!(picked, Some(41));
}
