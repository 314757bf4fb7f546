//! Shared types and utilities for tickprof
//!
//! This crate contains the data structures that cross the boundary between
//! the sampling host (which captures raw stacks), the profiling engine, and
//! whatever consumes finished profiles.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{sample::*, snapshot::*};
