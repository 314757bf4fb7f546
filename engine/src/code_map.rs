//! Code address map
//!
//! Maps instruction address ranges to the code entries currently occupying
//! them. Ranges never overlap: installing code over a region forgets every
//! entry the new range touches.

use std::collections::BTreeMap;
use std::sync::Arc;
use tickprof_shared::utils::format_address;
use tickprof_shared::Address;
use tracing::debug;

use crate::code_entry::CodeEntry;

#[derive(Debug, Clone)]
struct CodeEntryInfo {
    entry: Arc<CodeEntry>,
    size: u32,
}

/// Live code ranges keyed by start address
#[derive(Debug, Default)]
pub struct CodeMap {
    code_map: BTreeMap<Address, CodeEntryInfo>,
}

impl CodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `entry` at `[addr, addr + size)`, dropping every entry whose
    /// range intersects it
    pub fn add_code(&mut self, addr: Address, entry: Arc<CodeEntry>, size: u32) {
        self.delete_all_covered_code(addr, addr.saturating_add(size as Address));
        debug!(
            "Code added: {} size={} {}",
            format_address(addr),
            size,
            entry.name()
        );
        self.code_map.insert(addr, CodeEntryInfo { entry, size });
    }

    /// Remove every entry whose range intersects `[start, end)`. An empty or
    /// reversed range removes nothing.
    pub fn delete_all_covered_code(&mut self, start: Address, end: Address) {
        if end <= start {
            return;
        }
        let mut doomed = Vec::new();

        // An entry starting below `start` may still extend into the range.
        if let Some((&addr, info)) = self.code_map.range(..start).next_back() {
            if end_of(addr, info) > start {
                doomed.push(addr);
            }
        }
        doomed.extend(self.code_map.range(start..end).map(|(&addr, _)| addr));

        for addr in doomed {
            if let Some(info) = self.code_map.remove(&addr) {
                debug!(
                    "Code deleted: {} size={} {}",
                    format_address(addr),
                    info.size,
                    info.entry.name()
                );
            }
        }
    }

    /// Find the entry containing `addr` along with the start of its range
    pub fn find(&self, addr: Address) -> Option<(Address, &Arc<CodeEntry>)> {
        let (&start, info) = self.code_map.range(..=addr).next_back()?;
        if addr < end_of(start, info) {
            Some((start, &info.entry))
        } else {
            None
        }
    }

    /// Find the entry containing `addr`
    pub fn find_entry(&self, addr: Address) -> Option<&Arc<CodeEntry>> {
        self.find(addr).map(|(_, entry)| entry)
    }

    /// Relocate the code starting at `from` to `to`, keeping entry and size.
    /// Unknown `from` addresses are ignored.
    pub fn move_code(&mut self, from: Address, to: Address) {
        if from == to {
            return;
        }
        let Some(info) = self.code_map.remove(&from) else {
            return;
        };
        debug!("Code moved: {} -> {}", format_address(from), format_address(to));
        self.add_code(to, info.entry, info.size);
    }

    pub fn len(&self) -> usize {
        self.code_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_map.is_empty()
    }

    /// One line per live entry: start address, size and name
    pub fn dump(&self) -> String {
        self.code_map
            .iter()
            .map(|(&addr, info)| {
                format!("{} {:5} {}\n", format_address(addr), info.size, info.entry.name())
            })
            .collect()
    }
}

fn end_of(start: Address, info: &CodeEntryInfo) -> Address {
    start.saturating_add(info.size as Address)
}
