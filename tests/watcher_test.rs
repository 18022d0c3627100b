//! Tests for file growth watching

use futures::StreamExt;
use std::io::Write;
use std::time::Duration;
use stream_recorder_monitor::{FileGrowthWatcher, GrowthTracker, Liveness};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_growing_file_reports_sizes_and_never_stalls() {
    // Given: a file that gains bytes faster than the poll interval
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.ts");
    std::fs::write(&path, b"").unwrap();
    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        for _ in 0..40 {
            let mut f = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            f.write_all(&[0u8; 64]).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    // When: watching with a threshold of 3 for ~10 polls
    let watcher = FileGrowthWatcher::new(Duration::from_millis(30), 3);
    let cancel = CancellationToken::new();
    let reports: Vec<_> = watcher.watch(path, cancel).take(10).collect().await;
    writer.await.unwrap();

    // Then: sizes only go up and no stall was reported
    let sizes: Vec<u64> = reports
        .iter()
        .filter_map(|r| match r.signal {
            Some(Liveness::SizeChanged { bytes }) => Some(bytes),
            _ => None,
        })
        .collect();
    assert!(!sizes.is_empty());
    assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    assert!(!reports.iter().any(|r| matches!(r.signal, Some(Liveness::Stalled { .. }))));
    assert!(reports.iter().all(|r| r.stall_count < 3));
}

#[tokio::test]
async fn test_constant_file_stalls_exactly_once() {
    // Given: a file that never changes
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.ts");
    std::fs::write(&path, b"0123456789").unwrap();

    // When: polling well past the threshold of 5
    let watcher = FileGrowthWatcher::new(Duration::from_millis(10), 5);
    let reports: Vec<_> = watcher
        .watch(path, CancellationToken::new())
        .take(15)
        .collect()
        .await;

    // Then: one size report, one stall report, nothing else
    let signals: Vec<_> = reports.iter().filter_map(|r| r.signal.clone()).collect();
    assert_eq!(
        signals,
        vec![Liveness::SizeChanged { bytes: 10 }, Liveness::Stalled { polls: 5 }]
    );
    assert_eq!(reports.last().unwrap().stall_count, 14);
}

#[tokio::test]
async fn test_late_file_creation() {
    // Given: no file yet
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.ts");
    let watcher = FileGrowthWatcher::new(Duration::from_millis(20), 50);
    let mut reports = Box::pin(watcher.watch(path.clone(), CancellationToken::new()));

    // When: the backend creates it after a few polls
    let first = reports.next().await.unwrap();
    let second = reports.next().await.unwrap();
    std::fs::write(&path, b"abc").unwrap();
    let third = reports.next().await.unwrap();

    // Then: absence is reported once, then growth
    assert_eq!(first.signal, Some(Liveness::FileNotCreated));
    assert_eq!(second.signal, None);
    assert_eq!(third.signal, Some(Liveness::SizeChanged { bytes: 3 }));
}

#[test]
fn test_counter_is_monotonic_until_growth() {
    let mut tracker = GrowthTracker::new(3);
    tracker.observe(Some(1));
    let mut previous = tracker.stall_count();
    for _ in 0..10 {
        tracker.observe(Some(1));
        assert!(tracker.stall_count() >= previous);
        previous = tracker.stall_count();
    }
    tracker.observe(Some(2));
    assert_eq!(tracker.stall_count(), 0);
}
