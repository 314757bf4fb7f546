//! Session registry
//!
//! Tracks the profiles currently recording and the finished ones, and fans
//! every resolved sample path out to the recording set. One lock guards the
//! active list, so starting or stopping a profile never interleaves with a
//! sample delivery.
//!
//! The registry also owns the long-lived storage shared by all profiles: the
//! interned name table and the list of registered code entries.

use parking_lot::Mutex;
use std::sync::Arc;
use tickprof_shared::Timestamp;
use tracing::{debug, info, trace, warn};

use crate::code_entry::CodeEntry;
use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::profile::CpuProfile;
use crate::strings::NameTable;

/// Result of a successful start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new profile was created
    Started,
    /// A profile with the same title was already recording
    AlreadyActive,
}

/// Registry of active and finished profiles
#[derive(Debug)]
pub struct ProfileRegistry {
    max_simultaneous_profiles: usize,
    max_deopt_infos: usize,
    current_profiles: Mutex<Vec<CpuProfile>>,
    finished_profiles: Mutex<Vec<Arc<CpuProfile>>>,
    names: Mutex<NameTable>,
    code_entries: Mutex<Vec<Arc<CodeEntry>>>,
}

impl ProfileRegistry {
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            max_simultaneous_profiles: config.max_simultaneous_profiles,
            max_deopt_infos: config.max_deopt_infos_per_node,
            current_profiles: Mutex::new(Vec::new()),
            finished_profiles: Mutex::new(Vec::new()),
            names: Mutex::new(NameTable::new()),
            code_entries: Mutex::new(Vec::new()),
        }
    }

    /// Begin recording a profile titled `title`.
    ///
    /// Starting a title that is already recording succeeds without creating a
    /// second profile.
    pub fn start_profiling(&self, title: &str, record_samples: bool) -> Result<StartOutcome> {
        let mut current = self.current_profiles.lock();
        if current.iter().any(|p| p.title() == title) {
            debug!("Profile '{}' is already recording", title);
            return Ok(StartOutcome::AlreadyActive);
        }
        if current.len() >= self.max_simultaneous_profiles {
            warn!(
                "Rejected profile '{}': {} profiles already recording",
                title,
                current.len()
            );
            return Err(ProfilerError::TooManyProfiles {
                limit: self.max_simultaneous_profiles,
            });
        }

        current.push(CpuProfile::new(title, record_samples, self.max_deopt_infos));
        info!(
            "Started profile '{}' (record_samples={}, active={})",
            title,
            record_samples,
            current.len()
        );
        Ok(StartOutcome::Started)
    }

    fn take_active(&self, title: &str) -> Option<CpuProfile> {
        let mut current = self.current_profiles.lock();
        let index = if title.is_empty() {
            current.len().checked_sub(1)
        } else {
            current.iter().rposition(|p| p.title() == title)
        };
        index.map(|i| current.remove(i))
    }

    /// Stop a recording profile and move it to the finished list.
    ///
    /// An empty title stops the most recently started profile. Returns `None`
    /// when nothing matches.
    pub fn stop_profiling(&self, title: &str) -> Option<Arc<CpuProfile>> {
        let Some(mut profile) = self.take_active(title) else {
            warn!("No recording profile matches '{}'", title);
            return None;
        };

        profile.finish();
        let summary = profile.summary();
        info!(
            "Stopped profile '{}': {} ticks, {} nodes, {} samples",
            profile.title(),
            summary.total_ticks,
            summary.node_count,
            summary.sample_count
        );

        let profile = Arc::new(profile);
        self.finished_profiles.lock().push(profile.clone());
        Some(profile)
    }

    /// Drop a recording profile without finishing it. Title matching is the
    /// same as for [`stop_profiling`](Self::stop_profiling).
    pub fn cancel_profiling(&self, title: &str) -> bool {
        match self.take_active(title) {
            Some(profile) => {
                info!("Cancelled profile '{}'", profile.title());
                true
            }
            None => false,
        }
    }

    /// True when exactly one profile is recording and `title` names it. An
    /// empty title matches any single profile.
    pub fn is_last_profile(&self, title: &str) -> bool {
        let current = self.current_profiles.lock();
        match current.as_slice() {
            [only] => title.is_empty() || only.title() == title,
            _ => false,
        }
    }

    /// Number of profiles currently recording
    pub fn active_count(&self) -> usize {
        self.current_profiles.lock().len()
    }

    pub fn is_profiling(&self) -> bool {
        self.active_count() > 0
    }

    /// Titles of the recording profiles in start order
    pub fn active_titles(&self) -> Vec<String> {
        self.current_profiles
            .lock()
            .iter()
            .map(|p| p.title().to_string())
            .collect()
    }

    /// Insert one resolved path into every recording profile
    pub fn add_path_to_current_profiles(
        &self,
        timestamp: Option<Timestamp>,
        path: &[Option<Arc<CodeEntry>>],
        src_line: Option<u32>,
        update_stats: bool,
    ) {
        let mut current = self.current_profiles.lock();
        trace!(
            "Delivering path of {} frames to {} profiles",
            path.len(),
            current.len()
        );
        for profile in current.iter_mut() {
            profile.add_path(timestamp, path, src_line, update_stats);
        }
    }

    /// Finished profiles in stop order
    pub fn finished_profiles(&self) -> Vec<Arc<CpuProfile>> {
        self.finished_profiles.lock().clone()
    }

    /// Forget a finished profile
    pub fn remove_profile(&self, profile: &Arc<CpuProfile>) -> Result<()> {
        let mut finished = self.finished_profiles.lock();
        let Some(index) = finished.iter().position(|p| Arc::ptr_eq(p, profile)) else {
            return Err(ProfilerError::UnknownFinishedProfile(
                profile.title().to_string(),
            ));
        };
        finished.remove(index);
        debug!(
            "Removed finished profile '{}' ({} remaining)",
            profile.title(),
            finished.len()
        );
        Ok(())
    }

    /// Shared copy of `name` from the registry-wide name table
    pub fn intern(&self, name: &str) -> Arc<str> {
        self.names.lock().intern(name)
    }

    /// Take ownership of a code entry for the lifetime of the registry and
    /// return the shared handle used by code maps and call trees
    pub fn register(&self, entry: CodeEntry) -> Arc<CodeEntry> {
        let entry = Arc::new(entry);
        self.code_entries.lock().push(entry.clone());
        entry
    }

    pub fn code_entry_count(&self) -> usize {
        self.code_entries.lock().len()
    }
}
