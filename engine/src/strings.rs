//! Interned names
//!
//! Function and resource names are stored once per registry and shared by
//! every code entry that uses them.

use std::collections::HashSet;
use std::sync::Arc;

/// Set of interned strings
#[derive(Debug, Default)]
pub struct NameTable {
    names: HashSet<Arc<str>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared copy of `name`, storing it on first use
    pub fn intern(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let interned: Arc<str> = Arc::from(name);
        self.names.insert(interned.clone());
        interned
    }

    /// Number of distinct names stored
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
