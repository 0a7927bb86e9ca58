// Library crate - exports shared types, the signal pipeline and its collaborators

pub mod types;
pub mod signal_core;
pub mod sources;
pub mod sinks;

// Re-export commonly used types
pub use types::*;
pub use signal_core::{MonitorConfig, MonitorLoop, RegimeClassifier};
