//! Configuration types for the profiling engine

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Upper bound on concurrently active profiles
    pub max_simultaneous_profiles: usize,

    /// Attribute samples with no symbolized frame to a VM state pseudo-function
    /// ("(program)", "(idle)", "(garbage collector)") instead of the root
    pub browser_mode: bool,

    /// Deopt summaries kept per call tree node; later ones are only counted
    pub max_deopt_infos_per_node: usize,

    /// Bound of the events processor queue
    pub event_queue_capacity: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_profiles: env_or("TICKPROF_MAX_PROFILES", 100),
            browser_mode: env_or("TICKPROF_BROWSER_MODE", true),
            max_deopt_infos_per_node: env_or("TICKPROF_MAX_DEOPTS_PER_NODE", 64),
            event_queue_capacity: env_or("TICKPROF_QUEUE_CAPACITY", 4096),
        }
    }
}

impl ProfilerConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_simultaneous_profiles == 0 {
            anyhow::bail!("max_simultaneous_profiles must be greater than 0");
        }

        if self.max_deopt_infos_per_node == 0 {
            anyhow::bail!("max_deopt_infos_per_node must be greater than 0");
        }

        if self.event_queue_capacity == 0 {
            anyhow::bail!("event_queue_capacity must be greater than 0");
        }

        Ok(())
    }
}
