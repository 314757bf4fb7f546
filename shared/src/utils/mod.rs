//! Utility functions and helpers

pub mod time;

use crate::types::sample::Address;

/// Format an address the way diagnostics print it
pub fn format_address(addr: Address) -> String {
    format!("{:#014x}", addr)
}
