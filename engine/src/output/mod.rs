//! Output generation for finished profiles
//!
//! Supports a human-readable tree dump and JSON snapshots

pub mod json;
pub mod print;
