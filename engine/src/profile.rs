//! Profiling sessions
//!
//! A `CpuProfile` is one named profiling run: its call tree, the optional
//! trace of individual samples, and start/end timing.

use std::sync::Arc;
use tickprof_shared::utils::time::{monotonic_nanos, wall_clock_now, WallTime};
use tickprof_shared::{NodeSnapshot, ProfileSnapshot, SampleRecord, Timestamp};

use crate::code_entry::CodeEntry;
use crate::tree::{NodeId, ProfileNode, ProfileTree, TreeVisitor};

/// One retained sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub node: NodeId,
}

/// Derived statistics of a profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSummary {
    pub total_ticks: u64,
    pub node_count: usize,
    pub sample_count: usize,
    pub duration_ns: u64,
    /// Mean gap between retained samples, 0 with fewer than two samples
    pub mean_interval_ns: f64,
}

/// One profiling session
#[derive(Debug)]
pub struct CpuProfile {
    title: String,
    record_samples: bool,
    start_time: Timestamp,
    end_time: Option<Timestamp>,
    started_at: WallTime,
    top_down: ProfileTree,
    samples: Vec<Sample>,
}

impl CpuProfile {
    pub fn new(title: impl Into<String>, record_samples: bool, max_deopt_infos: usize) -> Self {
        Self {
            title: title.into(),
            record_samples,
            start_time: monotonic_nanos(),
            end_time: None,
            started_at: wall_clock_now(),
            top_down: ProfileTree::new(max_deopt_infos),
            samples: Vec::new(),
        }
    }

    /// Insert one sampled path into the tree, recording the sample when
    /// retention is on and the sample carries a timestamp
    pub fn add_path(
        &mut self,
        timestamp: Option<Timestamp>,
        path: &[Option<Arc<CodeEntry>>],
        src_line: Option<u32>,
        update_stats: bool,
    ) {
        let top_frame_node = self.top_down.add_path_from_end(path, src_line, update_stats);
        if let (true, Some(timestamp)) = (self.record_samples, timestamp) {
            self.samples.push(Sample {
                timestamp,
                node: top_frame_node,
            });
        }
    }

    /// Stamp the end time. Only the first call has an effect.
    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(monotonic_nanos().max(self.start_time));
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn record_samples(&self) -> bool {
        self.record_samples
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.end_time
    }

    pub fn started_at(&self) -> WallTime {
        self.started_at
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn top_down(&self) -> &ProfileTree {
        &self.top_down
    }

    /// Retained samples in arrival order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn summary(&self) -> ProfileSummary {
        let duration_ns = self
            .end_time
            .map(|end| end.saturating_sub(self.start_time))
            .unwrap_or(0);

        let mean_interval_ns = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) if self.samples.len() > 1 => {
                last.timestamp.saturating_sub(first.timestamp) as f64
                    / (self.samples.len() - 1) as f64
            }
            _ => 0.0,
        };

        ProfileSummary {
            total_ticks: self.top_down.total_ticks(),
            node_count: self.top_down.node_count(),
            sample_count: self.samples.len(),
            duration_ns,
            mean_interval_ns,
        }
    }

    /// Owned, pre-ordered view of the profile for exporters
    pub fn snapshot(&self) -> ProfileSnapshot {
        let mut collector = SnapshotCollector {
            nodes: Vec::with_capacity(self.top_down.node_count()),
        };
        collector.push(self.top_down.root());
        self.top_down.traverse_depth_first(&mut collector);

        ProfileSnapshot {
            title: self.title.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            started_at: self.started_at,
            nodes: collector.nodes,
            samples: self
                .samples
                .iter()
                .map(|s| SampleRecord {
                    timestamp: s.timestamp,
                    node_id: s.node.get(),
                })
                .collect(),
        }
    }
}

struct SnapshotCollector {
    nodes: Vec<NodeSnapshot>,
}

impl SnapshotCollector {
    fn push(&mut self, node: &ProfileNode) {
        let entry = node.entry();
        self.nodes.push(NodeSnapshot {
            id: node.id().get(),
            parent: node.parent().map(NodeId::get),
            function_id: node.function_id(),
            name: entry.full_name(),
            resource_name: entry.resource_name().to_string(),
            script_id: entry.script_id(),
            line: entry.line_number(),
            column: entry.column_number(),
            self_ticks: node.self_ticks(),
            line_ticks: node.line_ticks(),
            deopt_infos: node.deopt_infos().to_vec(),
            bailout_reason: entry.bailout_reason().map(str::to_string),
            children: node.children().iter().map(|c| c.get()).collect(),
        });
    }
}

impl TreeVisitor for SnapshotCollector {
    fn before_traversing_child(&mut self, _parent: &ProfileNode, child: &ProfileNode) {
        self.push(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_entry::CodeTag;

    fn entry(name: &str) -> Arc<CodeEntry> {
        Arc::new(CodeEntry::new(CodeTag::Function, name))
    }

    #[test]
    fn test_samples_recorded_when_enabled() {
        let main = entry("main");
        let f = entry("f");
        let mut profile = CpuProfile::new("p", true, 8);
        profile.add_path(Some(100), &[Some(f.clone()), Some(main.clone())], None, true);
        profile.add_path(Some(200), &[Some(main.clone())], None, true);

        let samples = profile.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, 100);
        assert_eq!(profile.top_down().node(samples[0].node).entry().name(), "f");
        assert_eq!(profile.top_down().node(samples[1].node).entry().name(), "main");
    }

    #[test]
    fn test_samples_not_recorded_when_disabled() {
        let mut profile = CpuProfile::new("p", false, 8);
        profile.add_path(Some(100), &[Some(entry("f"))], None, true);
        assert!(profile.samples().is_empty());
        assert_eq!(profile.top_down().total_ticks(), 1);
    }

    #[test]
    fn test_untimestamped_samples_not_recorded() {
        let mut profile = CpuProfile::new("p", true, 8);
        profile.add_path(None, &[Some(entry("f"))], None, true);
        assert!(profile.samples().is_empty());
        assert_eq!(profile.top_down().total_ticks(), 1);
    }

    #[test]
    fn test_finish_sets_end_time_once() {
        let mut profile = CpuProfile::new("p", false, 8);
        assert!(!profile.is_finished());
        profile.finish();
        let end = profile.end_time().unwrap();
        assert!(end >= profile.start_time());
        profile.finish();
        assert_eq!(profile.end_time(), Some(end));
    }

    #[test]
    fn test_summary() {
        let f = entry("f");
        let mut profile = CpuProfile::new("p", true, 8);
        for ts in [1_000, 2_000, 4_000] {
            profile.add_path(Some(ts), &[Some(f.clone())], None, true);
        }
        profile.finish();

        let summary = profile.summary();
        assert_eq!(summary.total_ticks, 3);
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.sample_count, 3);
        assert!((summary.mean_interval_ns - 1_500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_of_empty_profile() {
        let profile = CpuProfile::new("p", true, 8);
        let summary = profile.summary();
        assert_eq!(summary.total_ticks, 0);
        assert_eq!(summary.duration_ns, 0);
        assert_eq!(summary.mean_interval_ns, 0.0);
    }

    #[test]
    fn test_snapshot() {
        let main = entry("main");
        let f = entry("f");
        let g = entry("g");
        let mut profile = CpuProfile::new("snap", true, 8);
        profile.add_path(Some(10), &[Some(f.clone()), Some(main.clone())], Some(7), true);
        profile.add_path(Some(20), &[Some(g.clone()), Some(main.clone())], None, true);
        let deep = [Some(f.clone()), Some(g.clone()), Some(main.clone())];
        profile.add_path(Some(30), &deep, None, true);
        profile.finish();

        let snap = profile.snapshot();
        assert_eq!(snap.title, "snap");
        assert_eq!(snap.nodes.len(), 5);
        assert_eq!(snap.total_ticks(), 3);
        assert_eq!(snap.root().unwrap().name, "(root)");
        assert!(snap.end_time.is_some());

        // Pre-order: every parent precedes its children.
        for (i, node) in snap.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                let parent_pos = snap.nodes.iter().position(|n| n.id == parent).unwrap();
                assert!(parent_pos < i);
            }
        }

        let f_nodes: Vec<_> = snap.nodes.iter().filter(|n| n.name == "f").collect();
        assert_eq!(f_nodes.len(), 2);
        assert_eq!(f_nodes[0].function_id, f_nodes[1].function_id);

        let first_f = snap.node(snap.samples[0].node_id).unwrap();
        assert_eq!(first_f.name, "f");
        assert_eq!(first_f.line_ticks[0].line, 7);
        assert_eq!(snap.samples.len(), 3);
    }
}
