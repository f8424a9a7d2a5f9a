//! Jobs the scheduler ships with.

pub mod retention;

pub use retention::HistoryRetentionJob;
