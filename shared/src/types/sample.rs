//! Raw tick sample definitions
//!
//! These types represent one point-in-time capture of a thread's stack as
//! handed to the engine by the sampling host (signal handler, timer thread).

use serde::{Deserialize, Serialize};

/// Instruction or stack address
pub type Address = u64;

/// Monotonic timestamp in nanoseconds
pub type Timestamp = u64;

/// Coarse execution state of the runtime at the moment a sample was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    /// Executing script or interpreter code
    Js,
    /// Garbage collection in progress
    Gc,
    /// Compiling or optimizing code
    Compiler,
    /// Inside a host-provided callback
    External,
    /// Waiting for work
    Idle,
    #[default]
    Other,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Js => "js",
            VmState::Gc => "gc",
            VmState::Compiler => "compiler",
            VmState::External => "external",
            VmState::Idle => "idle",
            VmState::Other => "other",
        }
    }
}

impl std::str::FromStr for VmState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "js" => Ok(VmState::Js),
            "gc" => Ok(VmState::Gc),
            "compiler" => Ok(VmState::Compiler),
            "external" => Ok(VmState::External),
            "idle" => Ok(VmState::Idle),
            "other" => Ok(VmState::Other),
            _ => anyhow::bail!("Invalid VM state: {}", s),
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured stack snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSample {
    /// When the sample was taken. Samples without a timestamp still tick the
    /// tree but are not recorded in a profile's sample trace.
    pub timestamp: Option<Timestamp>,

    /// Current instruction address. `None` means the stack could not be
    /// captured at all.
    pub pc: Option<Address>,

    /// Value at the top of the stack, used when `pc` is in a frameless stub
    pub tos: Option<Address>,

    /// Entry address of the external callback the thread is running, if any
    pub external_callback_entry: Option<Address>,

    /// Return addresses of callers, innermost caller first
    pub stack: Vec<Address>,

    /// Execution state at sampling time
    pub state: VmState,

    /// Whether this sample increments tick counters
    pub update_stats: bool,
}

impl TickSample {
    /// Create a ticking JS-state sample at `pc` with the given caller addresses
    pub fn new(timestamp: Timestamp, pc: Address, stack: &[Address]) -> Self {
        Self {
            timestamp: Some(timestamp),
            pc: Some(pc),
            tos: None,
            external_callback_entry: None,
            stack: stack.to_vec(),
            state: VmState::Js,
            update_stats: true,
        }
    }

    /// Whether the thread was inside an external callback
    pub fn has_external_callback(&self) -> bool {
        self.external_callback_entry.is_some()
    }

    /// Number of caller frames captured
    pub fn frames_count(&self) -> usize {
        self.stack.len()
    }
}
