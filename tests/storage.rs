//! Storage Pressure Integration Tests
//!
//! The pipeline must keep the temp root under its ceiling: it evicts
//! the oldest payloads before fetching and can wipe everything on demand.

mod common;

use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;

use common::{new_item, Harness, Options};
use tubescribe::core::PipelineError;
use tubescribe::domain::{EventType, ItemState};
use tubescribe::storage::QuotaError;

fn write_aged(path: &Path, size: usize, age_secs: u64) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![0u8; size]).unwrap();
    let mtime = SystemTime::now() - Duration::from_secs(age_secs);
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
}

#[tokio::test]
async fn test_evicts_oldest_before_fetch() {
    let h = Harness::new(Options::default()).await;

    // 8,500 of 10,000 bytes: over the 80% threshold
    let oldest = h.downloads.join("old/a.mp3");
    write_aged(&oldest, 1_700, 5_000);
    for (i, age) in [4_000, 3_000, 2_000, 1_000].iter().enumerate() {
        write_aged(&h.downloads.join(format!("old/b{}.mp3", i)), 1_700, *age);
    }
    let before = h.quota.snapshot().unwrap();
    assert_eq!(before.used_bytes, 8_500);
    assert!(before.eviction_needed);

    let item = h.orchestrator.add_item(&new_item("fresh")).await.unwrap();
    let outcome = h.orchestrator.process_one(item.item()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.evictions.len(), 1);
    assert_eq!(outcome.evictions[0].files_removed, 1);
    assert_eq!(outcome.evictions[0].bytes_freed, 1_700);
    assert!(!oldest.exists());

    let after = h.quota.snapshot().unwrap();
    assert_eq!(after.used_bytes, 6_800);
    assert!(after.used_bytes <= h.quota.threshold_bytes());

    // The eviction is journaled before the fetch
    let events = h.orchestrator.journal().replay().await.unwrap();
    let eviction = events
        .iter()
        .position(|e| e.event_type == EventType::Eviction)
        .unwrap();
    let fetched = events
        .iter()
        .position(|e| e.event_type == EventType::ItemFetched)
        .unwrap();
    assert!(eviction < fetched);
    assert_eq!(events[eviction].bytes, Some(1_700));
}

#[tokio::test]
async fn test_no_eviction_under_threshold() {
    let h = Harness::new(Options::default()).await;
    write_aged(&h.downloads.join("old/a.mp3"), 7_000, 5_000);

    let item = h.orchestrator.add_item(&new_item("x")).await.unwrap();
    let outcome = h.orchestrator.process_one(item.item()).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.evictions.is_empty());
    assert!(h.downloads.join("old/a.mp3").exists());
}

#[tokio::test]
async fn test_emergency_cleanup_removes_everything() {
    let h = Harness::new(Options::default()).await;
    write_aged(&h.downloads.join("a/1.mp3"), 500, 100);
    write_aged(&h.downloads.join("b/2.m4a"), 300, 10);
    write_aged(&h.downloads.join("b/3.part"), 200, 1);

    let report = h.orchestrator.emergency_cleanup().await.unwrap();

    assert!(report.forced);
    assert_eq!(report.files_removed, 3);
    assert_eq!(report.bytes_freed, 1_000);
    assert_eq!(report.remaining_bytes, 0);
    assert!(h.payload_files().is_empty());

    let last = h
        .orchestrator
        .journal()
        .last_event_of_type(EventType::EmergencyCleanup)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.bytes, Some(1_000));
}

#[tokio::test]
async fn test_cycle_report_includes_snapshot() {
    let h = Harness::new(Options::default()).await;
    write_aged(&h.downloads.join("keep/a.wav"), 1_000, 10);
    h.discovery.push(new_item("c"));

    let report = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.snapshot.used_bytes, 1_000);
    assert_eq!(report.snapshot.file_count, 1);
    assert_eq!(report.snapshot.by_extension["wav"].count, 1);
    assert!(report.evictions.is_empty());
    assert_eq!(
        h.store.get("c").unwrap().unwrap().state,
        ItemState::Completed
    );
}

#[tokio::test]
async fn test_batch_evicts_once_before_first_item() {
    let h = Harness::new(Options::default()).await;

    // 8,500 of 10,000 bytes
    let oldest = h.downloads.join("old/a.mp3");
    write_aged(&oldest, 1_700, 5_000);
    for (i, age) in [4_000, 3_000, 2_000, 1_000].iter().enumerate() {
        write_aged(&h.downloads.join(format!("old/b{}.mp3", i)), 1_700, *age);
    }
    for id in ["x", "y"] {
        h.orchestrator.add_item(&new_item(id)).await.unwrap();
    }

    let pending = h.store.list_by_state(ItemState::Pending).unwrap();
    let report = h.orchestrator.process_batch(&pending).await.unwrap();

    assert_eq!(report.successful, 2);
    assert_eq!(report.evictions.len(), 1);
    assert_eq!(report.evictions[0].files_removed, 1);
    assert_eq!(report.evictions[0].bytes_freed, 1_700);
    assert!(report.outcomes.iter().all(|o| o.evictions.is_empty()));
    assert!(!oldest.exists());
    assert_eq!(h.quota.snapshot().unwrap().used_bytes, 6_800);
}

/// Fill the temp root past its ceiling with a file that cannot be deleted.
/// Returns false when the process can delete it anyway (running as root).
#[cfg(unix)]
fn pin_undeletable_usage(h: &Harness, size: usize) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let locked = h.downloads.join("locked");
    write_aged(&locked.join("big.mp3"), size, 100);
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

    let writable = locked.join("writable-check");
    if std::fs::write(&writable, b"").is_ok() {
        std::fs::remove_file(&writable).unwrap();
        unpin(h);
        return false;
    }
    true
}

#[cfg(unix)]
fn unpin(h: &Harness) {
    use std::os::unix::fs::PermissionsExt;

    let locked = h.downloads.join("locked");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_batch_aborts_when_ceiling_cannot_be_restored() {
    let h = Harness::new(Options::default()).await;
    if !pin_undeletable_usage(&h, 12_000) {
        eprintln!("skipping: permissions are not enforced for this user");
        return;
    }
    h.orchestrator.add_item(&new_item("blocked")).await.unwrap();

    let pending = h.store.list_by_state(ItemState::Pending).unwrap();
    let result = h.orchestrator.process_batch(&pending).await;
    unpin(&h);

    match result {
        Err(PipelineError::Quota(QuotaError::Exceeded { used, ceiling })) => {
            assert_eq!(used, 12_000);
            assert_eq!(ceiling, 10_000);
        }
        other => panic!("expected quota exceeded, got {other:?}"),
    }
    assert_eq!(
        h.store.get("blocked").unwrap().unwrap().state,
        ItemState::Pending
    );
    assert_eq!(h.retriever.stream_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cycle_aborts_when_ceiling_cannot_be_restored() {
    let h = Harness::new(Options::default()).await;
    if !pin_undeletable_usage(&h, 12_000) {
        eprintln!("skipping: permissions are not enforced for this user");
        return;
    }
    h.discovery.push(new_item("queued"));

    let result = h.orchestrator.run_cycle().await;
    unpin(&h);

    assert!(matches!(
        result,
        Err(PipelineError::Quota(QuotaError::Exceeded { .. }))
    ));
    // Discovery already stored the item; it waits for the next cycle
    assert_eq!(
        h.store.get("queued").unwrap().unwrap().state,
        ItemState::Pending
    );
}
