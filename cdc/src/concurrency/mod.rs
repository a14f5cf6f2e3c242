//! Concurrency primitives for capture session coordination.

pub mod shutdown;
