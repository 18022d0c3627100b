//! Backend process plumbing - spawning, output classification, termination

pub mod classify;
pub mod process;

pub use classify::{classify_line, extract_percent, LineClass};
pub use process::{ExitPath, ProcessHandle, ProcessMonitor};
