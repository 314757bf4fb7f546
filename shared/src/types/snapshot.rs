//! Profile snapshot data structures
//!
//! A snapshot is the outbound, owned view of a finished profile: a flat list
//! of call tree nodes (parents before children) plus the sample trace. It is
//! what exporters and viewers consume; the engine's own tree is not exposed
//! across crate boundaries.

use serde::{Deserialize, Serialize};

use super::sample::Timestamp;
use crate::utils::time::WallTime;

/// Hit counter for one source line of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineTick {
    /// 1-based source line
    pub line: u32,
    pub hit_count: u32,
}

/// One frame of the logical stack active when code was deoptimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeoptFrame {
    /// `None` when the deoptimized function had no script attached yet
    pub script_id: Option<u32>,
    /// Source position within the script
    pub position: u32,
}

/// Deoptimization summary captured on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeoptInfo {
    pub reason: String,
    /// Innermost frame first
    pub stack: Vec<DeoptFrame>,
}

/// A single call tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: u32,
    pub parent: Option<u32>,

    /// Identifier shared by all nodes of the same logical function
    pub function_id: u32,

    pub name: String,
    pub resource_name: String,
    pub script_id: Option<u32>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub self_ticks: u64,

    /// Sorted by line
    pub line_ticks: Vec<LineTick>,

    pub deopt_infos: Vec<DeoptInfo>,
    pub bailout_reason: Option<String>,

    /// Child node ids in creation order
    pub children: Vec<u32>,
}

/// One retained sample: when it was taken and which node it ticked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: Timestamp,
    pub node_id: u32,
}

/// Owned view of a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub title: String,
    pub start_time: Timestamp,

    /// `None` while the profile is still running
    pub end_time: Option<Timestamp>,

    /// Wall-clock time the profile was started
    pub started_at: WallTime,

    /// Nodes in pre-order; `nodes[0]` is the root
    pub nodes: Vec<NodeSnapshot>,

    pub samples: Vec<SampleRecord>,
}

impl ProfileSnapshot {
    /// Sum of self ticks across all nodes
    pub fn total_ticks(&self) -> u64 {
        self.nodes.iter().map(|n| n.self_ticks).sum()
    }

    /// Look up a node by id
    pub fn node(&self, id: u32) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The root node
    pub fn root(&self) -> Option<&NodeSnapshot> {
        self.nodes.first()
    }

    /// Duration in nanoseconds, zero while running
    pub fn duration_ns(&self) -> u64 {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time))
            .unwrap_or(0)
    }
}
