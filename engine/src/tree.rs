//! Call tree
//!
//! Aggregates sampled call paths into a top-down tree. Every node stands for
//! one function reached through one particular chain of callers; repeated
//! samples through the same chain land on the same node.
//!
//! Nodes live in an arena owned by the tree and are addressed by [`NodeId`].
//! Ids are handed out in creation order starting at 1 (the root) and never
//! reused.

use std::collections::HashMap;
use std::sync::Arc;
use tickprof_shared::{DeoptInfo, LineTick};
use tracing::trace;

use crate::code_entry::{CodeEntry, CodeTag, FunctionKey, ScriptKey, ROOT_ENTRY_NAME};

/// Values looked up by function identity.
///
/// Entries are matched by script key when both sides have one and by name key
/// otherwise, so a value found for an entry before its script info arrived is
/// still found for it afterwards.
#[derive(Debug)]
struct FunctionIndex<T> {
    by_name: HashMap<FunctionKey, (T, Arc<CodeEntry>)>,
    by_script: HashMap<ScriptKey, T>,
}

impl<T: Copy> FunctionIndex<T> {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_script: HashMap::new(),
        }
    }

    fn get(&self, entry: &CodeEntry) -> Option<T> {
        let script = entry.script_key();
        if let Some(value) = script.and_then(|key| self.by_script.get(&key)) {
            return Some(*value);
        }
        let (value, known) = self.by_name.get(&entry.key())?;
        match (script, known.script_key()) {
            (Some(a), Some(b)) if a != b => None,
            _ => Some(*value),
        }
    }

    /// Index `value` under both keys of `entry`. Existing bindings win, so
    /// this also records the script alias of a value found by name.
    fn insert(&mut self, entry: &Arc<CodeEntry>, value: T) {
        if let Some(script) = entry.script_key() {
            self.by_script.entry(script).or_insert(value);
        }
        self.by_name
            .entry(entry.key())
            .or_insert_with(|| (value, entry.clone()));
    }
}

/// Stable identifier of a node within its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn get(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One node of the call tree
#[derive(Debug)]
pub struct ProfileNode {
    id: NodeId,
    parent: Option<NodeId>,
    entry: Arc<CodeEntry>,
    function_id: u32,
    self_ticks: u64,
    children: FunctionIndex<NodeId>,
    children_list: Vec<NodeId>,
    line_ticks: HashMap<u32, u32>,
    deopt_infos: Vec<DeoptInfo>,
    dropped_deopt_infos: u32,
}

impl ProfileNode {
    fn new(id: NodeId, parent: Option<NodeId>, entry: Arc<CodeEntry>, function_id: u32) -> Self {
        Self {
            id,
            parent,
            entry,
            function_id,
            self_ticks: 0,
            children: FunctionIndex::new(),
            children_list: Vec::new(),
            line_ticks: HashMap::new(),
            deopt_infos: Vec::new(),
            dropped_deopt_infos: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn entry(&self) -> &Arc<CodeEntry> {
        &self.entry
    }

    /// Per-tree id shared by all nodes of the same logical function
    pub fn function_id(&self) -> u32 {
        self.function_id
    }

    pub fn self_ticks(&self) -> u64 {
        self.self_ticks
    }

    /// Children in creation order
    pub fn children(&self) -> &[NodeId] {
        &self.children_list
    }

    pub fn find_child(&self, entry: &CodeEntry) -> Option<NodeId> {
        self.children.get(entry)
    }

    fn increment_line_ticks(&mut self, src_line: u32) {
        *self.line_ticks.entry(src_line).or_insert(0) += 1;
    }

    /// Per-line hit counters, ordered by line
    pub fn line_ticks(&self) -> Vec<LineTick> {
        let mut ticks: Vec<LineTick> = self
            .line_ticks
            .iter()
            .map(|(&line, &hit_count)| LineTick { line, hit_count })
            .collect();
        ticks.sort_by_key(|tick| tick.line);
        ticks
    }

    pub fn deopt_infos(&self) -> &[DeoptInfo] {
        &self.deopt_infos
    }

    /// Deopts that arrived after the per-node bound was reached
    pub fn dropped_deopt_infos(&self) -> u32 {
        self.dropped_deopt_infos
    }

    fn collect_deopt_info(&mut self, entry: &CodeEntry, max_deopt_infos: usize) {
        let Some(info) = entry.take_deopt_info() else {
            return;
        };
        if self.deopt_infos.len() < max_deopt_infos {
            self.deopt_infos.push(info);
        } else {
            self.dropped_deopt_infos += 1;
        }
    }
}

/// Callbacks for [`ProfileTree::traverse_depth_first`]
pub trait TreeVisitor {
    fn before_traversing_child(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {}

    fn after_all_children_traversed(&mut self, _node: &ProfileNode) {}

    fn after_child_traversed(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {}
}

struct Position {
    node: NodeId,
    child_idx: usize,
}

/// Top-down call tree of one profile
#[derive(Debug)]
pub struct ProfileTree {
    nodes: Vec<ProfileNode>,
    function_ids: FunctionIndex<u32>,
    function_count: u32,
    max_deopt_infos: usize,
}

impl ProfileTree {
    /// Create a tree holding only the synthetic "(root)" node
    pub fn new(max_deopt_infos: usize) -> Self {
        let root_entry = Arc::new(CodeEntry::new(CodeTag::Function, ROOT_ENTRY_NAME));
        let mut function_ids = FunctionIndex::new();
        function_ids.insert(&root_entry, 1);
        Self {
            nodes: vec![ProfileNode::new(NodeId(1), None, root_entry, 1)],
            function_ids,
            function_count: 1,
            max_deopt_infos,
        }
    }

    pub fn root(&self) -> &ProfileNode {
        &self.nodes[0]
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(1)
    }

    /// Node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> &ProfileNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&ProfileNode> {
        self.nodes.get(id.index())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &ProfileNode> {
        self.nodes.iter()
    }

    fn find_or_add_child(&mut self, parent: NodeId, entry: &Arc<CodeEntry>) -> NodeId {
        let parent_node = &mut self.nodes[parent.index()];
        if let Some(child) = parent_node.children.get(entry) {
            parent_node.children.insert(entry, child);
            return child;
        }

        let id = NodeId(self.nodes.len() as u32 + 1);
        let function_id = self.function_id_for(entry);
        self.nodes
            .push(ProfileNode::new(id, Some(parent), entry.clone(), function_id));
        let parent_node = &mut self.nodes[parent.index()];
        parent_node.children.insert(entry, id);
        parent_node.children_list.push(id);
        trace!("New node {} for {} under {}", id, entry.name(), parent);
        id
    }

    fn function_id_for(&mut self, entry: &Arc<CodeEntry>) -> u32 {
        let function_id = match self.function_ids.get(entry) {
            Some(function_id) => function_id,
            None => {
                self.function_count += 1;
                self.function_count
            }
        };
        self.function_ids.insert(entry, function_id);
        function_id
    }

    /// Insert a call path given innermost frame first and return the node of
    /// the innermost resolved frame (the root if nothing resolved).
    ///
    /// `None` frames are skipped. With `update_stats` the node's self ticks,
    /// and the hit count of `src_line` when known, are incremented. A pending
    /// deopt on the innermost entry is moved onto the node.
    pub fn add_path_from_end(
        &mut self,
        path: &[Option<Arc<CodeEntry>>],
        src_line: Option<u32>,
        update_stats: bool,
    ) -> NodeId {
        let mut node = self.root_id();
        let mut last_entry = None;
        for entry in path.iter().rev().flatten() {
            node = self.find_or_add_child(node, entry);
            last_entry = Some(entry);
        }

        let max_deopt_infos = self.max_deopt_infos;
        let target = &mut self.nodes[node.index()];
        if let Some(entry) = last_entry {
            if entry.has_deopt_info() {
                target.collect_deopt_info(entry, max_deopt_infos);
            }
        }
        if update_stats {
            target.self_ticks += 1;
            if let Some(line) = src_line {
                target.increment_line_ticks(line);
            }
        }
        node
    }

    /// Number of distinct logical functions in the tree, root included
    pub fn function_count(&self) -> usize {
        self.function_count as usize
    }

    /// Non-recursive post-order walk from the root
    pub fn traverse_depth_first<V: TreeVisitor>(&self, visitor: &mut V) {
        let mut stack = Vec::with_capacity(16);
        stack.push(Position {
            node: self.root_id(),
            child_idx: 0,
        });

        while let Some(current) = stack.last() {
            let node = self.node(current.node);
            if let Some(&child) = node.children_list.get(current.child_idx) {
                visitor.before_traversing_child(node, self.node(child));
                stack.push(Position {
                    node: child,
                    child_idx: 0,
                });
            } else {
                visitor.after_all_children_traversed(node);
                stack.pop();
                if let Some(parent) = stack.last_mut() {
                    visitor.after_child_traversed(self.node(parent.node), node);
                    parent.child_idx += 1;
                }
            }
        }
    }

    /// Sum of self ticks over the whole tree
    pub fn total_ticks(&self) -> u64 {
        struct Sum(u64);
        impl TreeVisitor for Sum {
            fn after_all_children_traversed(&mut self, node: &ProfileNode) {
                self.0 += node.self_ticks();
            }
        }
        let mut sum = Sum(0);
        self.traverse_depth_first(&mut sum);
        sum.0
    }

    /// Self ticks of a node plus all of its descendants
    pub fn total_ticks_of(&self, id: NodeId) -> u64 {
        let mut total = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = self.node(next);
            total += node.self_ticks;
            pending.extend_from_slice(&node.children_list);
        }
        total
    }
}
