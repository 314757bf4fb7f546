//! Structured error types for the profiling engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Too many simultaneous profiles (limit {limit})")]
    TooManyProfiles { limit: usize },

    #[error("No active profile titled '{0}'")]
    ProfileNotFound(String),

    #[error("Profile '{0}' is not in the finished list")]
    UnknownFinishedProfile(String),

    #[error("Events processor is no longer accepting events")]
    ProcessorStopped,

    #[error("Events processor thread panicked")]
    ProcessorPanicked,

    #[error("Failed to spawn events processor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T, E = ProfilerError> = std::result::Result<T, E>;
