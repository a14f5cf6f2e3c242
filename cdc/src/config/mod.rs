//! Configuration objects for CDC capture.
//!
//! This module contains re-exported configurations that are needed by the
//! capture core.

// Re-exports.
pub use cdc_config::shared::*;
