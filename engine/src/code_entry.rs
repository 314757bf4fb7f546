//! Code entries
//!
//! A `CodeEntry` is the identity of one logical function (or pseudo-function
//! such as "(program)") together with the side tables needed to attribute a
//! program counter inside its code: source lines, inlined call stacks and
//! deoptimization frames.
//!
//! Entries are created by the host when code is first observed, registered
//! with the [`ProfileRegistry`](crate::registry::ProfileRegistry), and then
//! shared by `Arc` between the code map and every call tree node that
//! represents a call to them.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tickprof_shared::{DeoptFrame, DeoptInfo};

pub const ROOT_ENTRY_NAME: &str = "(root)";
pub const PROGRAM_ENTRY_NAME: &str = "(program)";
pub const IDLE_ENTRY_NAME: &str = "(idle)";
pub const GARBAGE_COLLECTOR_ENTRY_NAME: &str = "(garbage collector)";
pub const UNRESOLVED_FUNCTION_NAME: &str = "(unresolved function)";

/// Kind of code an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeTag {
    Function,
    LazyCompile,
    Script,
    Eval,
    Builtin,
    Callback,
    Stub,
    Handler,
    RegExp,
}

/// Builtins the sample translator needs to recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    FunctionPrototypeApply,
    FunctionPrototypeCall,
    Other(u32),
}

/// Map from code offset to 1-based source line
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    positions: BTreeMap<u32, u32>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that code at `pc_offset` belongs to `line`. A later call for the
    /// same offset replaces the earlier line.
    pub fn set_position(&mut self, pc_offset: u32, line: u32) {
        debug_assert!(line > 0, "source lines are 1-based");
        self.positions.insert(pc_offset, line);
    }

    /// Line for `pc_offset`: the entry at the nearest offset at or below it.
    /// Offsets before the first recorded one map to the first line.
    pub fn source_line(&self, pc_offset: u32) -> Option<u32> {
        self.positions
            .range(..=pc_offset)
            .next_back()
            .or_else(|| self.positions.iter().next())
            .map(|(_, &line)| line)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl FromIterator<(u32, u32)> for LineTable {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        let mut table = LineTable::new();
        for (pc_offset, line) in iter {
            table.set_position(pc_offset, line);
        }
        table
    }
}

/// A frame inlined into optimized code, as recorded for one deopt point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptInlinedFrame {
    pub script_id: u32,
    /// Source position of the call within its script
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionInfo {
    script_id: u32,
    position: u32,
    bailout_reason: Option<Arc<str>>,
}

#[derive(Debug, Clone)]
struct PendingDeopt {
    reason: Arc<str>,
    deopt_id: u32,
    position: u32,
}

/// Name-based identity of a function.
///
/// Every entry has one from creation on and it never changes, which makes it
/// the stable half of function identity. Entries that later learn their
/// script also carry a [`ScriptKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub name_prefix: Arc<str>,
    pub name: Arc<str>,
    pub resource_name: Arc<str>,
    pub line_number: Option<u32>,
}

/// Script identity of a function: script id and start position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptKey {
    pub script_id: u32,
    pub position: u32,
}

/// One logical function
#[derive(Debug)]
pub struct CodeEntry {
    tag: CodeTag,
    builtin: Option<Builtin>,
    name_prefix: Arc<str>,
    name: Arc<str>,
    resource_name: Arc<str>,
    line_number: Option<u32>,
    column_number: Option<u32>,
    line_info: Option<LineTable>,

    /// pc offset -> inlined call stack, outermost first
    inline_locations: HashMap<u32, Vec<Arc<CodeEntry>>>,

    /// deopt id -> inlined frames active at that deopt point, outermost first
    deopt_inlined_frames: HashMap<u32, Vec<DeoptInlinedFrame>>,

    function_info: OnceCell<FunctionInfo>,
    pending_deopt: Mutex<Option<PendingDeopt>>,
}

impl CodeEntry {
    /// Create an entry with empty prefix and resource name and unknown position
    pub fn new(tag: CodeTag, name: impl Into<Arc<str>>) -> Self {
        Self {
            tag,
            builtin: None,
            name_prefix: Arc::from(""),
            name: name.into(),
            resource_name: Arc::from(""),
            line_number: None,
            column_number: None,
            line_info: None,
            inline_locations: HashMap::new(),
            deopt_inlined_frames: HashMap::new(),
            function_info: OnceCell::new(),
            pending_deopt: Mutex::new(None),
        }
    }

    pub fn with_name_prefix(mut self, name_prefix: impl Into<Arc<str>>) -> Self {
        self.name_prefix = name_prefix.into();
        self
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<Arc<str>>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    /// Set the 1-based declared line and column
    pub fn with_position(mut self, line_number: u32, column_number: u32) -> Self {
        self.line_number = Some(line_number);
        self.column_number = Some(column_number);
        self
    }

    pub fn with_line_info(mut self, line_info: LineTable) -> Self {
        self.line_info = Some(line_info);
        self
    }

    /// Mark the entry as a builtin
    pub fn with_builtin(mut self, builtin: Builtin) -> Self {
        self.tag = CodeTag::Builtin;
        self.builtin = Some(builtin);
        self
    }

    /// Attach the inlined call stack for code at `pc_offset`, ordered
    /// outermost first. The outermost element is the function that owns the
    /// code; the sample translator substitutes the whole stack for it.
    pub fn add_inline_stack(&mut self, pc_offset: u32, inline_stack: Vec<Arc<CodeEntry>>) {
        self.inline_locations.insert(pc_offset, inline_stack);
    }

    /// Attach the inlined frames for deopt point `deopt_id`, outermost first
    pub fn add_deopt_inlined_frames(&mut self, deopt_id: u32, frames: Vec<DeoptInlinedFrame>) {
        self.deopt_inlined_frames.insert(deopt_id, frames);
    }

    pub fn tag(&self) -> CodeTag {
        self.tag
    }

    pub fn builtin(&self) -> Option<Builtin> {
        self.builtin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Prefix and name joined, as shown to users
    pub fn full_name(&self) -> String {
        format!("{}{}", self.name_prefix, self.name)
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    pub fn column_number(&self) -> Option<u32> {
        self.column_number
    }

    /// True for `Function.prototype.apply` and `Function.prototype.call`,
    /// whose true caller cannot be recovered from a sample
    pub fn is_apply_or_call(&self) -> bool {
        matches!(
            self.builtin,
            Some(Builtin::FunctionPrototypeApply | Builtin::FunctionPrototypeCall)
        )
    }

    /// Source line of the code at `pc_offset`, if a line table is attached
    pub fn source_line(&self, pc_offset: u32) -> Option<u32> {
        self.line_info
            .as_ref()
            .filter(|table| !table.is_empty())
            .and_then(|table| table.source_line(pc_offset))
    }

    pub fn inline_stack(&self, pc_offset: u32) -> Option<&[Arc<CodeEntry>]> {
        self.inline_locations.get(&pc_offset).map(Vec::as_slice)
    }

    /// Attach script identity once the compiled unit is known. Returns false
    /// if the entry already had it; the first fill wins.
    pub fn fill_function_info(
        &self,
        script_id: u32,
        position: u32,
        bailout_reason: Option<&str>,
    ) -> bool {
        self.function_info
            .set(FunctionInfo {
                script_id,
                position,
                bailout_reason: bailout_reason.map(Arc::from),
            })
            .is_ok()
    }

    pub fn script_id(&self) -> Option<u32> {
        self.function_info.get().map(|info| info.script_id)
    }

    /// Start position of the function within its script
    pub fn position(&self) -> Option<u32> {
        self.function_info.get().map(|info| info.position)
    }

    pub fn bailout_reason(&self) -> Option<&str> {
        self.function_info
            .get()
            .and_then(|info| info.bailout_reason.as_deref())
    }

    /// Name-based identity, available whether or not script info is known
    pub fn key(&self) -> FunctionKey {
        FunctionKey {
            name_prefix: self.name_prefix.clone(),
            name: self.name.clone(),
            resource_name: self.resource_name.clone(),
            line_number: self.line_number,
        }
    }

    pub fn script_key(&self) -> Option<ScriptKey> {
        self.function_info.get().map(|info| ScriptKey {
            script_id: info.script_id,
            position: info.position,
        })
    }

    /// Entries are compared by script identity when both have one, and by
    /// their name fields otherwise.
    pub fn is_same_function_as(&self, other: &CodeEntry) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match (self.script_key(), other.script_key()) {
            (Some(a), Some(b)) => a == b,
            _ => self.key() == other.key(),
        }
    }

    pub fn has_deopt_inlined_frames_for(&self, deopt_id: u32) -> bool {
        self.deopt_inlined_frames.contains_key(&deopt_id)
    }

    pub fn deopt_inlined_frames(&self, deopt_id: u32) -> Option<&[DeoptInlinedFrame]> {
        self.deopt_inlined_frames.get(&deopt_id).map(Vec::as_slice)
    }

    /// Record that the code was deoptimized at deopt point `deopt_id`,
    /// `position` characters into the innermost function. Replaces any
    /// pending deopt that has not been collected yet.
    pub fn set_deopt_info(&self, reason: impl Into<Arc<str>>, deopt_id: u32, position: u32) {
        *self.pending_deopt.lock() = Some(PendingDeopt {
            reason: reason.into(),
            deopt_id,
            position,
        });
    }

    pub fn has_deopt_info(&self) -> bool {
        self.pending_deopt.lock().is_some()
    }

    /// Consume the pending deopt, building its frame stack innermost first
    pub fn take_deopt_info(&self) -> Option<DeoptInfo> {
        let pending = self.pending_deopt.lock().take()?;

        let stack = match self.deopt_inlined_frames.get(&pending.deopt_id) {
            None => vec![DeoptFrame {
                script_id: self.script_id(),
                position: self.position().unwrap_or(0).saturating_add(pending.position),
            }],
            Some(frames) => frames
                .iter()
                .rev()
                .enumerate()
                .map(|(depth, frame)| DeoptFrame {
                    script_id: Some(frame.script_id),
                    position: if depth == 0 {
                        frame.position.saturating_add(pending.position)
                    } else {
                        frame.position
                    },
                })
                .collect(),
        };

        Some(DeoptInfo {
            reason: pending.reason.to_string(),
            stack,
        })
    }
}
