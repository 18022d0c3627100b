//! Output-file liveness watching

mod growth;

pub use growth::{file_size, FileGrowthWatcher, GrowthReport, GrowthTracker, Liveness};
