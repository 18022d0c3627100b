//! File growth detection - decides whether a recording is still producing data
//!
//! The backend can stay alive while writing nothing. The only reliable
//! signal is the size of the output file, sampled at a fixed interval.

use futures::stream::{self, Stream};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_THRESHOLD: u32 = 5;

/// Something worth telling observers about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The file does not exist yet. Reported once; polling continues.
    FileNotCreated,
    /// The size differs from the previous sample
    SizeChanged { bytes: u64 },
    /// `polls` consecutive samples without change. Reported once per episode.
    Stalled { polls: u32 },
    /// The file existed and is now gone. Ends the watch.
    FileDeleted,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowthReport {
    pub size: Option<u64>,
    pub stall_count: u32,
    pub signal: Option<Liveness>,
}

/// Tracks file size across samples
#[derive(Debug, Clone)]
pub struct GrowthTracker {
    threshold: u32,
    seen_file: bool,
    reported_missing: bool,
    last_size: u64,
    stall_count: u32,
    stalled: bool,
    finished: bool,
}

impl GrowthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            seen_file: false,
            reported_missing: false,
            last_size: 0,
            stall_count: 0,
            stalled: false,
            finished: false,
        }
    }

    /// Feed one sample (`None` = file missing).
    pub fn observe(&mut self, size: Option<u64>) -> Option<Liveness> {
        if self.finished {
            return None;
        }

        let Some(size) = size else {
            if self.seen_file {
                self.finished = true;
                return Some(Liveness::FileDeleted);
            }
            if !self.reported_missing {
                self.reported_missing = true;
                return Some(Liveness::FileNotCreated);
            }
            return None;
        };
        self.seen_file = true;

        if size == self.last_size {
            self.stall_count = self.stall_count.saturating_add(1);
            if self.stall_count >= self.threshold && !self.stalled {
                self.stalled = true;
                return Some(Liveness::Stalled {
                    polls: self.stall_count,
                });
            }
            return None;
        }

        self.last_size = size;
        self.stall_count = 0;
        self.stalled = false;
        Some(Liveness::SizeChanged { bytes: size })
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// True once the file has disappeared after existing
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Polls the output file of one recording.
#[derive(Debug, Clone)]
pub struct FileGrowthWatcher {
    pub poll_interval: Duration,
    pub stale_threshold: u32,
}

impl Default for FileGrowthWatcher {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

struct WatchState {
    path: PathBuf,
    tracker: GrowthTracker,
    ticker: Interval,
    cancel: CancellationToken,
}

impl FileGrowthWatcher {
    pub fn new(poll_interval: Duration, stale_threshold: u32) -> Self {
        Self {
            poll_interval,
            stale_threshold,
        }
    }

    /// One report per poll, starting one interval from now. Ends when
    /// `cancel` fires or the file is deleted.
    pub fn watch(&self, path: PathBuf, cancel: CancellationToken) -> impl Stream<Item = GrowthReport> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = WatchState {
            path,
            tracker: GrowthTracker::new(self.stale_threshold),
            ticker,
            cancel,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if st.tracker.is_finished() {
                    return None;
                }
                tokio::select! {
                    biased;
                    _ = st.cancel.cancelled() => {
                        debug!(path = %st.path.display(), "growth watch cancelled");
                        return None;
                    }
                    _ = st.ticker.tick() => {}
                }

                let size = match file_size(&st.path).await {
                    Ok(size) => size,
                    Err(e) => {
                        debug!(path = %st.path.display(), "cannot stat output file, skipping sample: {}", e);
                        continue;
                    }
                };
                let signal = st.tracker.observe(size);
                let report = GrowthReport {
                    size,
                    stall_count: st.tracker.stall_count(),
                    signal,
                };
                return Some((report, st));
            }
        })
    }
}

/// Current size, `Ok(None)` if the file does not exist. Any other stat
/// failure is an error, not a missing file.
pub async fn file_size(path: &Path) -> io::Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
