//! Shared building blocks for every Cadence crate: configuration, the
//! top-level error type, identifiers and the timestamp format used in the
//! shared store.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
