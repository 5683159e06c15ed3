//! Continuous Mode Integration Tests

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{new_item, Harness, Options};
use tubescribe::domain::ItemState;
use tubescribe::store::TransitionUpdate;

/// Poll until `id` reaches `state`, then cancel
async fn cancel_when(h: &Harness, id: &str, state: ItemState, cancel: &CancellationToken) {
    loop {
        let current = h.store.get(id).unwrap().map(|item| item.state);
        if current == Some(state) {
            cancel.cancel();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_stops_after_in_flight_cycle_when_cancelled() {
    let h = Harness::new(Options::default()).await;
    h.discovery.push(new_item("live"));
    let cancel = CancellationToken::new();

    let run = async {
        tokio::join!(
            h.orchestrator
                .start_continuous(Duration::from_secs(3600), cancel.clone()),
            cancel_when(&h, "live", ItemState::Completed, &cancel),
        )
    };
    let (summary, ()) = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("continuous mode did not stop");
    let summary = summary.unwrap();

    assert_eq!(summary.cycles_run, 1);
    assert_eq!(summary.failed_cycles, 0);
    assert_eq!(summary.recovered, 0);
    assert!(h.payload_files().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_runs_no_cycle() {
    let h = Harness::new(Options::default()).await;
    h.discovery.push(new_item("never"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = h
        .orchestrator
        .start_continuous(Duration::from_millis(10), cancel)
        .await
        .unwrap();

    assert_eq!(summary.cycles_run, 0);
    assert!(h.store.get("never").unwrap().is_none());
}

#[tokio::test]
async fn test_recovers_interrupted_items_on_start() {
    let h = Harness::new(Options::default()).await;
    h.orchestrator.add_item(&new_item("crashed")).await.unwrap();
    h.store
        .transition("crashed", ItemState::Fetching, TransitionUpdate::none())
        .unwrap();
    h.store
        .transition(
            "crashed",
            ItemState::Fetched,
            TransitionUpdate::fetched(h.downloads.join("chan/crashed.mp3")),
        )
        .unwrap();
    h.store
        .transition("crashed", ItemState::Transforming, TransitionUpdate::none())
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = h
        .orchestrator
        .start_continuous(Duration::from_millis(10), cancel)
        .await
        .unwrap();

    assert_eq!(summary.recovered, 1);
    let stored = h.store.get("crashed").unwrap().unwrap();
    assert_eq!(stored.state, ItemState::Failed);
    assert!(stored.payload_path.is_none());
}

#[tokio::test]
async fn test_processes_items_across_cycles() {
    let h = Harness::new(Options::default()).await;
    h.discovery.push(new_item("first"));
    let cancel = CancellationToken::new();

    let feeder = async {
        cancel_when(&h, "first", ItemState::Completed, &CancellationToken::new()).await;
        h.discovery.push(new_item("second"));
        cancel_when(&h, "second", ItemState::Completed, &cancel).await;
    };

    let run = async {
        tokio::join!(
            h.orchestrator
                .start_continuous(Duration::from_millis(20), cancel.clone()),
            feeder,
        )
    };
    let (summary, ()) = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("continuous mode did not stop");
    let summary = summary.unwrap();

    assert!(summary.cycles_run >= 2);
    assert_eq!(h.store.counts().unwrap().completed, 2);
}
