//! Configuration types for the CDC capture pipeline.
//!
//! The capture core consumes this configuration; it does not own it. All
//! settings are explicit structs passed by value, never ambient process
//! state.

pub mod shared;
