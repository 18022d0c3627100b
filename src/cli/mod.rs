//! CLI command handling

pub mod output;
pub mod probe;
pub mod record;

pub use output::*;
pub use probe::*;
pub use record::*;

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}
