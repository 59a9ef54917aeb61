//! Concurrency tests for the crawl state store
//!
//! Many tasks discover, download, fail and requeue overlapping identifiers
//! at once. The invariants are checked under the lock after every operation.

use neb_harvest::state::{Request, StateStore};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const IDS: usize = 40;

fn id(n: usize) -> String {
    format!("item-{}", n % IDS)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invariants_hold_under_concurrent_workers() {
    let dir = tempdir().unwrap();
    let store = Arc::new(StateStore::new(
        Request::catalog("abc"),
        dir.path().join("progress.json"),
        Duration::ZERO,
    ));

    let mut handles = Vec::new();

    // Crawl side: pages with overlapping identifiers
    for worker in 0..4usize {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for round in 0..50usize {
                let items: Vec<String> = (0..5).map(|k| id(worker * 7 + round * 3 + k)).collect();
                {
                    let mut state = store.access().await;
                    let page = state.allocate_pages(1).first().copied().unwrap_or(1);
                    state.record_page_items(page, &items);
                    // Same content again never adds anything
                    assert_eq!(state.record_page_items(page, &items), 0);
                    state.check_invariants().unwrap();
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    // Download side: succeed, fail or get interrupted at random
    for _ in 0..4usize {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for _ in 0..200usize {
                let next = store.access().await.pop_download();
                let item = match next {
                    Some(item) => item,
                    None => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                };

                // Work happens outside the lock
                tokio::task::yield_now().await;

                let roll = rand::thread_rng().gen_range(0..10);
                let mut state = store.access().await;
                match roll {
                    0..=5 => state.mark_downloaded(&item),
                    6..=8 => {
                        state.requeue_download(item, 3);
                    }
                    _ => state.return_download(item),
                }
                state.check_invariants().unwrap();
            }
        }));
    }

    // Checkpoints taken mid-run are always consistent
    {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                store.save_checkpoint_now().await;
                let snapshot = store.access().await.snapshot();
                for item in &snapshot.download_queue {
                    assert!(!snapshot.downloaded.contains(item));
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let state = store.access().await;
    state.check_invariants().unwrap();
    assert!(state.pending_downloads() + state.downloaded().len() <= IDS);

    // Saving and loading into a fresh store reconstructs the same sets
    drop(state);
    store.save_checkpoint_now().await;
    let reloaded = StateStore::new(
        Request::catalog("abc"),
        dir.path().join("progress.json"),
        Duration::ZERO,
    );
    reloaded.load_checkpoint().await;

    let before = store.access().await;
    let after = reloaded.access().await;
    assert_eq!(after.downloaded(), before.downloaded());
    assert_eq!(after.processed_pages(), before.processed_pages());
    assert_eq!(after.pending_downloads(), before.pending_downloads());
    after.check_invariants().unwrap();
}
