//! Sample-to-path translation
//!
//! `ProfileGenerator` owns the code map. It applies code lifecycle events to
//! it and turns every raw [`TickSample`] into a path of code entries, which
//! the registry then fans out to the recording profiles.

use std::sync::Arc;
use tickprof_shared::utils::format_address;
use tickprof_shared::{Address, TickSample, VmState};
use tracing::{debug, trace, warn};

use crate::code_entry::{
    CodeEntry, CodeTag, GARBAGE_COLLECTOR_ENTRY_NAME, IDLE_ENTRY_NAME, PROGRAM_ENTRY_NAME,
    UNRESOLVED_FUNCTION_NAME,
};
use crate::code_map::CodeMap;
use crate::config::ProfilerConfig;
use crate::registry::ProfileRegistry;

/// Code lifecycle notification from the runtime
#[derive(Debug, Clone)]
pub enum CodeEvent {
    /// Code for `entry` was installed at `[start, start + size)`
    Creation {
        start: Address,
        size: u32,
        entry: Arc<CodeEntry>,
    },
    /// Code was relocated, e.g. by a compacting collector
    Move { from: Address, to: Address },
    /// Code in `[start, end)` was freed
    Delete { start: Address, end: Address },
    /// The script behind the code at `start` became known
    FunctionInfo {
        start: Address,
        script_id: u32,
        position: u32,
        bailout_reason: Option<String>,
    },
    /// The optimized code at `start` was deoptimized
    Deopt {
        start: Address,
        reason: String,
        deopt_id: u32,
        position: u32,
    },
}

/// A symbolized sample path, innermost frame first
pub type Path = Vec<Option<Arc<CodeEntry>>>;

pub struct ProfileGenerator {
    registry: Arc<ProfileRegistry>,
    code_map: CodeMap,
    browser_mode: bool,
    program_entry: Arc<CodeEntry>,
    idle_entry: Arc<CodeEntry>,
    gc_entry: Arc<CodeEntry>,
    unresolved_entry: Arc<CodeEntry>,

    /// Reused across ticks so steady-state sampling does not allocate
    entries: Path,
}

impl ProfileGenerator {
    pub fn new(registry: Arc<ProfileRegistry>, config: &ProfilerConfig) -> Self {
        let pseudo = |name: &str| {
            let name = registry.intern(name);
            registry.register(CodeEntry::new(CodeTag::Function, name))
        };
        let program_entry = pseudo(PROGRAM_ENTRY_NAME);
        let idle_entry = pseudo(IDLE_ENTRY_NAME);
        let gc_entry = pseudo(GARBAGE_COLLECTOR_ENTRY_NAME);
        let unresolved_entry = pseudo(UNRESOLVED_FUNCTION_NAME);

        Self {
            registry,
            code_map: CodeMap::new(),
            browser_mode: config.browser_mode,
            program_entry,
            idle_entry,
            gc_entry,
            unresolved_entry,
            entries: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    pub fn code_map(&self) -> &CodeMap {
        &self.code_map
    }

    pub fn apply_code_event(&mut self, event: CodeEvent) {
        match event {
            CodeEvent::Creation { start, size, entry } => {
                self.code_map.add_code(start, entry, size);
            }
            CodeEvent::Move { from, to } => {
                if self.code_map.find_entry(to).is_some() {
                    warn!(
                        "Code moved onto live code: {} -> {}",
                        format_address(from),
                        format_address(to)
                    );
                }
                self.code_map.move_code(from, to);
            }
            CodeEvent::Delete { start, end } => {
                self.code_map.delete_all_covered_code(start, end);
            }
            CodeEvent::FunctionInfo {
                start,
                script_id,
                position,
                bailout_reason,
            } => match self.code_map.find_entry(start) {
                Some(entry) => {
                    if !entry.fill_function_info(script_id, position, bailout_reason.as_deref()) {
                        debug!("Function info for {} already known", entry.name());
                    }
                }
                None => debug!("Function info for unknown code at {}", format_address(start)),
            },
            CodeEvent::Deopt {
                start,
                reason,
                deopt_id,
                position,
            } => match self.code_map.find_entry(start) {
                Some(entry) => {
                    debug!("Deopt of {} (id {}): {}", entry.name(), deopt_id, reason);
                    entry.set_deopt_info(reason, deopt_id, position);
                }
                None => debug!("Deopt of unknown code at {}", format_address(start)),
            },
        }
    }

    /// Symbolize one sample and deliver it to every recording profile
    pub fn record_tick_sample(&mut self, sample: &TickSample) {
        let mut entries = std::mem::take(&mut self.entries);
        let src_line = self.translate(sample, &mut entries);
        trace!(
            "Tick: {} frames, {} entries, line {:?}",
            sample.frames_count(),
            entries.len(),
            src_line
        );
        self.registry.add_path_to_current_profiles(
            sample.timestamp,
            &entries,
            src_line,
            sample.update_stats,
        );
        entries.clear();
        self.entries = entries;
    }

    /// Resolve `sample` into `entries` (cleared first), innermost frame first.
    /// Returns the source line of the innermost resolved frame.
    pub fn translate(&self, sample: &TickSample, entries: &mut Path) -> Option<u32> {
        entries.clear();
        entries.reserve(sample.frames_count() + 3);

        let mut src_line = None;
        let mut src_line_found = false;

        if let Some(pc) = sample.pc {
            match sample.external_callback_entry {
                // The pc points somewhere inside the callback itself, which
                // would make the callback appear to call itself.
                Some(callback) if sample.state == VmState::External => {
                    entries.push(self.code_map.find_entry(callback).cloned());
                }
                _ => {
                    let mut resolved = self.code_map.find(pc).map(|(start, e)| (pc, start, e));

                    // Frameless invocation: the pc is in native code but the
                    // top of the stack still points into the caller. This is
                    // a heuristic and can misattribute native transitions.
                    if resolved.is_none() && !sample.has_external_callback() {
                        resolved = sample.tos.and_then(|tos| {
                            self.code_map.find(tos).map(|(start, e)| (tos, start, e))
                        });
                    }

                    if let Some((addr, start, entry)) = resolved {
                        src_line = line_of(entry, pc_offset(addr, start));
                        src_line_found = true;
                        entries.push(Some(entry.clone()));

                        // The caller of apply/call cannot be recovered.
                        if entry.is_apply_or_call() && !sample.has_external_callback() {
                            entries.push(Some(self.unresolved_entry.clone()));
                        }
                    }
                }
            }

            for &addr in &sample.stack {
                let Some((start, entry)) = self.code_map.find(addr) else {
                    entries.push(None);
                    continue;
                };
                let offset = pc_offset(addr, start);
                if !src_line_found {
                    src_line = line_of(entry, offset);
                    src_line_found = true;
                }
                match entry.inline_stack(offset) {
                    Some(stack) if !stack.is_empty() => {
                        entries.extend(stack.iter().rev().cloned().map(Some));
                    }
                    _ => entries.push(Some(entry.clone())),
                }
            }
        }

        if self.browser_mode && entries.iter().all(Option::is_none) {
            entries.push(Some(self.entry_for_vm_state(sample.state).clone()));
        }

        src_line
    }

    /// Pseudo-function a sample is charged to when nothing on its stack
    /// could be symbolized
    pub fn entry_for_vm_state(&self, state: VmState) -> &Arc<CodeEntry> {
        match state {
            VmState::Gc => &self.gc_entry,
            VmState::Idle => &self.idle_entry,
            VmState::Js | VmState::Compiler | VmState::External | VmState::Other => {
                &self.program_entry
            }
        }
    }
}

fn pc_offset(addr: Address, start: Address) -> u32 {
    // The code map only reports ranges whose size fits in u32.
    (addr - start) as u32
}

/// Line from the entry's own table, falling back to its declared line
fn line_of(entry: &CodeEntry, pc_offset: u32) -> Option<u32> {
    entry.source_line(pc_offset).or(entry.line_number())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_entry::{Builtin, LineTable};
    use crate::registry::StartOutcome;

    fn config(browser_mode: bool) -> ProfilerConfig {
        ProfilerConfig {
            max_simultaneous_profiles: 4,
            browser_mode,
            max_deopt_infos_per_node: 8,
            event_queue_capacity: 16,
        }
    }

    fn generator(browser_mode: bool) -> ProfileGenerator {
        let config = config(browser_mode);
        ProfileGenerator::new(Arc::new(ProfileRegistry::new(&config)), &config)
    }

    fn install(
        gen: &mut ProfileGenerator,
        start: Address,
        size: u32,
        entry: CodeEntry,
    ) -> Arc<CodeEntry> {
        let entry = gen.registry().register(entry);
        gen.apply_code_event(CodeEvent::Creation {
            start,
            size,
            entry: entry.clone(),
        });
        entry
    }

    fn function(name: &str) -> CodeEntry {
        CodeEntry::new(CodeTag::Function, name)
    }

    fn names(path: &Path) -> Vec<Option<String>> {
        path.iter()
            .map(|e| e.as_ref().map(|e| e.name().to_string()))
            .collect()
    }

    fn some(names: &[&str]) -> Vec<Option<String>> {
        names.iter().map(|n| Some(n.to_string())).collect()
    }

    #[test]
    fn test_simple_stack() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("f"));
        install(&mut gen, 0x2000, 0x100, function("main"));

        let mut path = Vec::new();
        gen.translate(&TickSample::new(1, 0x1010, &[0x2020]), &mut path);
        assert_eq!(names(&path), some(&["f", "main"]));
    }

    #[test]
    fn test_apply_gets_unresolved_caller() {
        let mut gen = generator(false);
        install(
            &mut gen,
            0x1000,
            0x100,
            function("apply").with_builtin(Builtin::FunctionPrototypeApply),
        );
        install(&mut gen, 0x2000, 0x100, function("main"));

        let mut path = Vec::new();
        gen.translate(&TickSample::new(1, 0x1010, &[0x2020]), &mut path);
        assert_eq!(
            names(&path),
            some(&["apply", "(unresolved function)", "main"])
        );
    }

    #[test]
    fn test_call_inside_callback_gets_no_unresolved_frame() {
        let mut gen = generator(false);
        install(
            &mut gen,
            0x1000,
            0x100,
            function("call").with_builtin(Builtin::FunctionPrototypeCall),
        );
        install(&mut gen, 0x3000, 0x100, function("cb"));

        // Callback flagged but the VM is not in the external state, so the
        // pc is still used.
        let mut sample = TickSample::new(1, 0x1010, &[]);
        sample.external_callback_entry = Some(0x3000);

        let mut path = Vec::new();
        gen.translate(&sample, &mut path);
        assert_eq!(names(&path), some(&["call"]));
    }

    #[test]
    fn test_external_callback_ignores_pc() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("inner"));
        install(&mut gen, 0x2000, 0x100, function("main"));
        install(&mut gen, 0x3000, 0x100, function("callback"));

        let mut sample = TickSample::new(1, 0x1010, &[0x2010]);
        sample.state = VmState::External;
        sample.external_callback_entry = Some(0x3000);

        let mut path = Vec::new();
        let line = gen.translate(&sample, &mut path);
        assert_eq!(names(&path), some(&["callback", "main"]));
        assert_eq!(line, None);
    }

    #[test]
    fn test_tos_fallback() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("frameless").with_position(12, 1));

        let mut sample = TickSample::new(1, 0x9000, &[]);
        sample.tos = Some(0x1020);

        let mut path = Vec::new();
        let line = gen.translate(&sample, &mut path);
        assert_eq!(names(&path), some(&["frameless"]));
        assert_eq!(line, Some(12));

        // No fallback while a callback is flagged.
        sample.external_callback_entry = Some(0x7000);
        gen.translate(&sample, &mut path);
        assert!(path.is_empty());
    }

    #[test]
    fn test_unresolved_callers_are_kept_as_placeholders() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("f"));
        install(&mut gen, 0x2000, 0x100, function("main"));

        let mut path = Vec::new();
        gen.translate(&TickSample::new(1, 0x1010, &[0x5000, 0x2010]), &mut path);
        assert_eq!(
            names(&path),
            vec![Some("f".to_string()), None, Some("main".to_string())]
        );
    }

    #[test]
    fn test_missing_pc_ignores_stack() {
        let mut gen = generator(false);
        install(&mut gen, 0x2000, 0x100, function("main"));

        let mut sample = TickSample::new(1, 0, &[0x2010]);
        sample.pc = None;

        let mut path = Vec::new();
        gen.translate(&sample, &mut path);
        assert!(path.is_empty());
    }

    #[test]
    fn test_inline_stack_is_spliced() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("leaf"));

        let outer = gen.registry().register(function("outer"));
        let inlined = gen.registry().register(function("inlined"));
        let mut caller = function("outer");
        caller.add_inline_stack(0x40, vec![outer, inlined]);
        install(&mut gen, 0x2000, 0x100, caller);
        install(&mut gen, 0x3000, 0x100, function("main"));

        let mut path = Vec::new();
        gen.translate(&TickSample::new(1, 0x1010, &[0x2040, 0x3010]), &mut path);
        assert_eq!(names(&path), some(&["leaf", "inlined", "outer", "main"]));

        // Other offsets of the same code are not inlined.
        gen.translate(&TickSample::new(1, 0x1010, &[0x2041, 0x3010]), &mut path);
        assert_eq!(names(&path), some(&["leaf", "outer", "main"]));
    }

    #[test]
    fn test_source_line_from_line_table() {
        let mut gen = generator(false);
        let table: LineTable = [(0x0, 3), (0x20, 5)].into_iter().collect();
        install(
            &mut gen,
            0x1000,
            0x100,
            function("f").with_position(2, 1).with_line_info(table),
        );

        let mut path = Vec::new();
        assert_eq!(gen.translate(&TickSample::new(1, 0x1024, &[]), &mut path), Some(5));
        assert_eq!(gen.translate(&TickSample::new(1, 0x1004, &[]), &mut path), Some(3));
    }

    #[test]
    fn test_source_line_from_first_resolved_caller() {
        let mut gen = generator(false);
        install(&mut gen, 0x2000, 0x100, function("main").with_position(40, 1));

        let mut path = Vec::new();
        let line = gen.translate(&TickSample::new(1, 0x9000, &[0x5000, 0x2010]), &mut path);
        assert_eq!(line, Some(40));
        assert_eq!(names(&path), vec![None, Some("main".to_string())]);
    }

    #[test]
    fn test_browser_mode_charges_vm_state() {
        let gen = generator(true);
        let mut path = Vec::new();

        for (state, expected) in [
            (VmState::Gc, "(garbage collector)"),
            (VmState::Idle, "(idle)"),
            (VmState::Js, "(program)"),
            (VmState::Other, "(program)"),
        ] {
            let mut sample = TickSample::new(1, 0x9000, &[0x9100]);
            sample.state = state;
            gen.translate(&sample, &mut path);
            assert_eq!(names(&path), vec![None, Some(expected.to_string())]);
        }

        let mut empty = TickSample::default();
        empty.state = VmState::Gc;
        gen.translate(&empty, &mut path);
        assert_eq!(names(&path), some(&["(garbage collector)"]));
    }

    #[test]
    fn test_no_substitution_outside_browser_mode() {
        let gen = generator(false);
        let mut path = Vec::new();
        gen.translate(&TickSample::new(1, 0x9000, &[]), &mut path);
        assert!(path.is_empty());
    }

    #[test]
    fn test_record_tick_sample_reaches_profiles() {
        let mut gen = generator(true);
        install(&mut gen, 0x1000, 0x100, function("f"));
        install(&mut gen, 0x2000, 0x100, function("main"));

        let registry = gen.registry().clone();
        assert_eq!(
            registry.start_profiling("p", true).unwrap(),
            StartOutcome::Started
        );
        gen.record_tick_sample(&TickSample::new(10, 0x1010, &[0x2010]));
        gen.record_tick_sample(&TickSample::new(20, 0x1010, &[0x2010]));
        gen.record_tick_sample(&TickSample::new(30, 0x9000, &[]));

        let profile = registry.stop_profiling("p").unwrap();
        let tree = profile.top_down();
        assert_eq!(tree.total_ticks(), 3);
        assert_eq!(profile.samples().len(), 3);
        assert_eq!(profile.samples()[0].node, profile.samples()[1].node);
        assert_eq!(tree.node(profile.samples()[2].node).entry().name(), "(program)");
    }

    #[test]
    fn test_function_info_event() {
        let mut gen = generator(false);
        let entry = install(&mut gen, 0x1000, 0x100, function("f"));

        gen.apply_code_event(CodeEvent::FunctionInfo {
            start: 0x1000,
            script_id: 7,
            position: 120,
            bailout_reason: Some("optimization disabled".to_string()),
        });
        assert_eq!(entry.script_id(), Some(7));
        assert_eq!(entry.bailout_reason(), Some("optimization disabled"));

        // Unknown code is ignored.
        gen.apply_code_event(CodeEvent::FunctionInfo {
            start: 0x8000,
            script_id: 1,
            position: 0,
            bailout_reason: None,
        });
    }

    #[test]
    fn test_deopt_event_lands_on_node_once() {
        let mut gen = generator(false);
        let entry = install(&mut gen, 0x1000, 0x100, function("hot"));
        entry.fill_function_info(3, 100, None);
        let registry = gen.registry().clone();
        registry.start_profiling("p", false).unwrap();

        gen.apply_code_event(CodeEvent::Deopt {
            start: 0x1010,
            reason: "wrong map".to_string(),
            deopt_id: 1,
            position: 4,
        });
        assert!(entry.has_deopt_info());

        gen.record_tick_sample(&TickSample::new(1, 0x1010, &[]));
        gen.record_tick_sample(&TickSample::new(2, 0x1010, &[]));

        let profile = registry.stop_profiling("p").unwrap();
        let tree = profile.top_down();
        let node = tree.node(tree.root().children()[0]);
        assert_eq!(node.deopt_infos().len(), 1);
        assert_eq!(node.deopt_infos()[0].reason, "wrong map");
        assert_eq!(node.deopt_infos()[0].stack[0].position, 104);
        assert!(!entry.has_deopt_info());
    }

    #[test]
    fn test_move_and_delete_events() {
        let mut gen = generator(false);
        install(&mut gen, 0x1000, 0x100, function("f"));

        gen.apply_code_event(CodeEvent::Move {
            from: 0x1000,
            to: 0x4000,
        });
        assert!(gen.code_map().find_entry(0x1000).is_none());
        assert_eq!(gen.code_map().find_entry(0x4010).unwrap().name(), "f");

        gen.apply_code_event(CodeEvent::Delete {
            start: 0x4000,
            end: 0x4100,
        });
        assert!(gen.code_map().is_empty());
    }
}
