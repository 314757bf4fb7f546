//! Sampling CPU profile engine
//!
//! This library turns raw stack samples into aggregated call trees. It
//! provides the code address map used to symbolize samples, the call tree
//! and profile session types, the registry of recording profiles, and an
//! events processor that applies code events and ticks on its own thread.

pub mod code_entry;
pub mod code_map;
pub mod config;
pub mod error;
pub mod generator;
pub mod output;
pub mod processor;
pub mod profile;
pub mod profiler;
pub mod registry;
pub mod strings;
pub mod tree;

pub use code_entry::{
    Builtin, CodeEntry, CodeTag, DeoptInlinedFrame, FunctionKey, LineTable, ScriptKey,
};
pub use code_map::CodeMap;
pub use config::ProfilerConfig;
pub use error::{ProfilerError, Result};
pub use generator::{CodeEvent, ProfileGenerator};
pub use processor::{EventsProcessor, ProfilerEvent, SampleSender, StartFailure};
pub use profile::{CpuProfile, ProfileSummary, Sample};
pub use profiler::CpuProfiler;
pub use registry::{ProfileRegistry, StartOutcome};
pub use tree::{NodeId, ProfileNode, ProfileTree, TreeVisitor};
