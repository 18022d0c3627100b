//! Supervisor and session lifecycle tests against a scripted fake backend

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use stream_recorder_monitor::{
    EventKind, RecorderConfig, RecorderError, RecorderEvent, SessionState, Supervisor,
};
use tokio::sync::broadcast::Receiver;

const GOOD_METADATA: &str = r#"echo '{"plugin":"test","metadata":{"author":"X","title":"Y"}}'; exit 0"#;

/// Write an executable fake backend.
///
/// `metadata` runs when `--json` is passed; otherwise `record` runs with
/// `$out` set to the requested output file.
fn fake_backend(dir: &Path, metadata: &str, record: &str) -> PathBuf {
    let path = dir.join("fake-backend.sh");
    let script = format!(
        r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "--json" ]; then
    {metadata}
  fi
done
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; shift; fi
  shift
done
touch "{marker}"
{record}
"#,
        metadata = metadata,
        marker = dir.join("spawned").display(),
        record = record,
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn test_config(backend: &Path, grace_ms: u64) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.backend.program = backend.to_string_lossy().into_owned();
    config.poll_interval_ms = 50;
    config.stale_threshold = 4;
    config.grace_period_ms = grace_ms;
    config.log_dir = None;
    config
}

const GROWING: &str = r#"echo "[cli][info] Opening stream: best (hls)"
i=0
while true; do
  i=$((i+1))
  printf '0123456789' >> "$out"
  echo "progress: $((i % 100))%"
  sleep 0.05
done"#;

fn drain(rx: &mut Receiver<RecorderEvent>) -> Vec<RecorderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn statuses(events: &[RecorderEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::StatusChanged { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn process_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn wait_for_state(supervisor: &Supervisor, url: &str, state: SessionState) {
    let handle = supervisor.handle(url).unwrap();
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state || s.is_terminal()))
        .await
        .expect("timed out waiting for session state")
        .unwrap();
}

#[tokio::test]
async fn test_start_twice_is_already_session() {
    // Given: a session whose metadata query takes a while
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), &format!("sleep 1; {}", GOOD_METADATA), GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();

    // When: starting the same URL again
    let second = supervisor.start("u1", dir.path().join("rec"), None);

    // Then: it is refused, and a different URL is not
    assert!(matches!(second, Err(RecorderError::AlreadySession { .. })));
    assert!(supervisor.start("u2", dir.path().join("rec"), None).is_ok());
    assert_eq!(supervisor.list().len(), 2);

    supervisor.shutdown_all().await;
    assert_eq!(supervisor.active_count(), 0);
}

#[tokio::test]
async fn test_stop_unknown_url_is_not_found() {
    let supervisor = Supervisor::new(&RecorderConfig::default());
    assert!(matches!(
        supervisor.stop("https://live/unknown").await,
        Err(RecorderError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_metadata_failure_spawns_nothing() {
    // Given: a backend whose metadata query fails
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), "echo 'no plugin can handle URL' >&2; exit 1", GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    let mut rx = supervisor.subscribe();

    // When: starting a session
    let handle = supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    let state = handle.wait_terminal().await;

    // Then: it failed without ever running the recording mode
    assert_eq!(state, SessionState::Failed);
    assert!(!dir.path().join("spawned").exists());
    let snapshot = supervisor.get("u1").unwrap();
    assert_eq!(snapshot.output_path, None);
    assert_eq!(snapshot.pid, None);
    assert!(snapshot.failure.unwrap().contains("no plugin can handle URL"));

    let events = drain(&mut rx);
    assert_eq!(statuses(&events), vec!["resolving metadata", "failed"]);
    assert!(!events.iter().any(|e| matches!(e.kind, EventKind::SizeChanged { .. })));
}

#[tokio::test]
async fn test_malformed_metadata_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), "echo 'this is not json'; exit 0", GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));

    let handle = supervisor.start("u1", dir.path().join("rec"), None).unwrap();

    assert_eq!(handle.wait_terminal().await, SessionState::Failed);
    assert!(supervisor.get("u1").unwrap().failure.unwrap().contains("parse"));
    assert!(!dir.path().join("spawned").exists());
}

#[tokio::test]
async fn test_end_to_end_record_and_stop() {
    // Given: a backend reporting X/Y and writing a growing file
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), GOOD_METADATA, GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 2000));
    let mut rx = supervisor.subscribe();

    // When: recording for a bit, then stopping
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_state(&supervisor, "u1", SessionState::Recording).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    let final_state = supervisor.stop("u1").await.unwrap();

    // Then: the full lifecycle was reported in order
    assert_eq!(final_state, SessionState::Stopped);
    let events = drain(&mut rx);
    assert_eq!(
        statuses(&events)
            .into_iter()
            .filter(|s| ["resolving metadata", "starting", "recording", "stopping", "stopped"].contains(&s.as_str()))
            .collect::<Vec<_>>(),
        vec!["resolving metadata", "starting", "recording", "stopping", "stopped"]
    );
    assert!(statuses(&events).iter().any(|s| s.contains("Opening stream")));

    let metadata_seq = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::MetadataReceived { .. }))
        .map(|e| e.seq)
        .expect("metadata event");
    let sizes: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::SizeChanged { bytes, .. } => Some((e.seq, bytes)),
            _ => None,
        })
        .collect();
    assert!(!sizes.is_empty());
    assert!(sizes.iter().all(|(seq, _)| *seq > metadata_seq));
    assert!(sizes.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::ProgressChanged { .. })));

    let final_log = events
        .iter()
        .rev()
        .find_map(|e| match &e.kind {
            EventKind::Log { text, .. } if text.starts_with("final size") => Some(text.clone()),
            _ => None,
        })
        .expect("final size log");
    let snapshot = supervisor.get("u1").unwrap();
    assert!(final_log.contains(&format!("{} bytes", snapshot.last_size)));

    // and the file got its derived name
    let path = snapshot.output_path.unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("[X] "));
    assert!(name.ends_with(" Y.ts"));
    assert!(path.exists());
}

/// Wait until the session's output file has grown at least once, which
/// means the backend script is past its setup lines.
async fn wait_for_growth(rx: &mut Receiver<RecorderEvent>) -> Vec<RecorderEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            let grew = matches!(event.kind, EventKind::SizeChanged { .. });
            seen.push(event);
            if grew {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for the file to grow");
    seen
}

fn log_texts(events: &[RecorderEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Log { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Alive and not a zombie waiting to be reaped by its new parent.
fn process_alive(pid: u32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        return stat
            .rsplit_once(") ")
            .map(|(_, rest)| !rest.starts_with('Z'))
            .unwrap_or(false);
    }
    process_exists(pid)
}

#[tokio::test]
async fn test_stop_kills_backend_ignoring_sigterm() {
    // Given: a backend that ignores SIGTERM, already writing, and a 1s grace period
    let dir = tempfile::tempdir().unwrap();
    let stubborn = format!("trap '' TERM\n{}", GROWING);
    let backend = fake_backend(dir.path(), GOOD_METADATA, &stubborn);
    let grace = Duration::from_millis(1000);
    let supervisor = Supervisor::new(&test_config(&backend, grace.as_millis() as u64));
    let mut rx = supervisor.subscribe();
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_growth(&mut rx).await;
    let pid = supervisor.get("u1").unwrap().pid.unwrap();
    assert!(process_exists(pid));

    // When: stopping
    let started = Instant::now();
    let state = supervisor.stop("u1").await.unwrap();
    let elapsed = started.elapsed();

    // Then: it sat out the grace period, was killed, and is gone
    assert_eq!(state, SessionState::Stopped);
    assert!(elapsed >= grace, "returned after {:?}", elapsed);
    assert!(elapsed < grace + Duration::from_millis(2500), "returned after {:?}", elapsed);
    assert!(!process_exists(pid));

    let logs = log_texts(&drain(&mut rx));
    let stopped = logs
        .iter()
        .find(|t| t.starts_with("backend stopped on request"))
        .expect("stop log");
    assert!(stopped.contains("signal: 9"), "{}", stopped);
}

#[tokio::test]
async fn test_session_reports_stopping_while_backend_winds_down() {
    // Given: a recording whose backend ignores SIGTERM, with a 2s grace period
    let dir = tempfile::tempdir().unwrap();
    let stubborn = format!("trap '' TERM\n{}", GROWING);
    let backend = fake_backend(dir.path(), GOOD_METADATA, &stubborn);
    let grace = Duration::from_millis(2000);
    let supervisor = Supervisor::new(&test_config(&backend, grace.as_millis() as u64));
    let mut rx = supervisor.subscribe();
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_growth(&mut rx).await;
    let pid = supervisor.get("u1").unwrap().pid.unwrap();
    let mut state_rx = supervisor.handle("u1").unwrap().watch_state();

    // When: a stop is requested from another task
    let started = Instant::now();
    let stopper = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.stop("u1").await })
    };

    // Then: Stopping is visible right away, while the backend is still alive
    tokio::time::timeout(Duration::from_millis(500), state_rx.wait_for(|s| *s == SessionState::Stopping))
        .await
        .expect("session never reported stopping")
        .unwrap();
    assert!(started.elapsed() < grace);
    assert_eq!(supervisor.get("u1").unwrap().state, SessionState::Stopping);
    assert!(process_exists(pid));

    // and Stopped only once termination is confirmed
    assert_eq!(stopper.await.unwrap().unwrap(), SessionState::Stopped);
    assert!(started.elapsed() >= grace);
    assert!(!process_exists(pid));

    let statuses = statuses(&drain(&mut rx));
    let stopping = statuses.iter().position(|s| s == "stopping").unwrap();
    let stopped = statuses.iter().position(|s| s == "stopped").unwrap();
    assert!(stopping < stopped);
}

#[tokio::test]
async fn test_shutdown_leaves_no_backend_helpers_running() {
    // Given: a backend that forks a long-lived helper before recording
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let record = format!("sleep 300 &\necho $! > '{}'\n{}", pid_file.display(), GROWING);
    let backend = fake_backend(dir.path(), GOOD_METADATA, &record);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    let mut rx = supervisor.subscribe();
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_growth(&mut rx).await;
    let helper: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(process_alive(helper));

    // When: shutting everything down
    let results = supervisor.shutdown_all().await;

    // Then: the helper went down with the backend
    assert!(results.iter().all(|(_, s)| *s == SessionState::Stopped));
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(helper) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(helper), "helper {} outlived shutdown_all", helper);
}

#[tokio::test]
async fn test_natural_exit_completes_session() {
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), GOOD_METADATA, r#"printf 'data' > "$out"; echo "stream ended""#);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    let mut rx = supervisor.subscribe();

    let handle = supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    let state = tokio::time::timeout(Duration::from_secs(10), handle.wait_terminal())
        .await
        .unwrap();

    assert_eq!(state, SessionState::Stopped);
    let statuses = statuses(&drain(&mut rx));
    let completed = statuses.iter().position(|s| s == "completed").expect("completed status");
    let stopping = statuses.iter().position(|s| s == "stopping").unwrap();
    assert!(completed < stopping);
    assert_eq!(supervisor.get("u1").unwrap().last_size, 4);
}

#[tokio::test]
async fn test_stall_is_reported_once_and_does_not_kill() {
    // Given: a backend that writes once, then stays alive writing nothing
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), GOOD_METADATA, r#"printf 'header' > "$out"; while true; do sleep 0.05; done"#);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    let mut rx = supervisor.subscribe();
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_state(&supervisor, "u1", SessionState::Recording).await;

    // When: waiting well past the stall threshold (4 polls of 50ms)
    tokio::time::sleep(Duration::from_millis(1000)).await;

    // Then: exactly one stall warning, and the session is still recording
    let snapshot = supervisor.get("u1").unwrap();
    assert_eq!(snapshot.state, SessionState::Recording);
    assert!(snapshot.stall_count >= 4);
    let events = drain(&mut rx);
    let stalls = events
        .iter()
        .filter(|e| matches!(&e.kind, EventKind::Log { text, .. } if text.contains("stalled")))
        .count();
    assert_eq!(stalls, 1);

    assert_eq!(supervisor.stop("u1").await.unwrap(), SessionState::Stopped);
}

#[tokio::test]
async fn test_stop_during_metadata_fails_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), &format!("sleep 5; {}", GOOD_METADATA), GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    supervisor.start("u1", dir.path().join("rec"), None).unwrap();
    wait_for_state(&supervisor, "u1", SessionState::ResolvingMetadata).await;

    let started = Instant::now();
    let state = supervisor.stop("u1").await.unwrap();

    assert_eq!(state, SessionState::Failed);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!dir.path().join("spawned").exists());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    // Given: two recordings
    let dir = tempfile::tempdir().unwrap();
    let backend = fake_backend(dir.path(), GOOD_METADATA, GROWING);
    let supervisor = Supervisor::new(&test_config(&backend, 1000));
    supervisor.start("u1", dir.path().join("a"), None).unwrap();
    supervisor.start("u2", dir.path().join("b"), None).unwrap();
    wait_for_state(&supervisor, "u1", SessionState::Recording).await;
    wait_for_state(&supervisor, "u2", SessionState::Recording).await;

    // When: stopping one
    assert_eq!(supervisor.stop("u1").await.unwrap(), SessionState::Stopped);

    // Then: the other keeps recording
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.get("u2").unwrap().state, SessionState::Recording);
    assert_eq!(supervisor.active_count(), 1);

    let results = supervisor.shutdown_all().await;
    assert!(results.iter().all(|(_, s)| s.is_terminal()));
}
