//! Stream distribution: per-stream state, the registry and the capture loop

pub mod manager;
pub mod state;
pub mod status;

pub use manager::{CycleReport, StreamManager};
pub use state::{ClientGuard, SettingsUpdate, StreamRegistry, StreamState, StreamStats};
pub use status::{StatusSnapshot, StreamStatus};
