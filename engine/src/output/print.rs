//! Indented tree dump
//!
//! Debugging aid only; the layout is not a stable interface.

use std::fmt::Write;

use crate::profile::CpuProfile;
use crate::tree::{ProfileNode, ProfileTree, TreeVisitor};

/// Render a profile's call tree, one node per line, children indented two
/// columns under their parent
pub fn print_profile(profile: &CpuProfile) -> String {
    let mut out = format!("[Top down]: {}\n", profile.title());
    out.push_str(&print_tree(profile.top_down()));
    out
}

pub fn print_tree(tree: &ProfileTree) -> String {
    let mut printer = TreePrinter {
        out: String::new(),
        depth: 0,
    };
    printer.print_node(tree.root());
    tree.traverse_depth_first(&mut printer);
    printer.out
}

struct TreePrinter {
    out: String,
    depth: usize,
}

impl TreePrinter {
    fn print_node(&mut self, node: &ProfileNode) {
        let indent = self.depth * 2;
        let entry = node.entry();

        // Writing into a String cannot fail.
        let _ = write!(
            self.out,
            "{:5} {:indent$} {} {} #{}",
            node.self_ticks(),
            "",
            entry.full_name(),
            entry.script_id().unwrap_or(0),
            node.id().get(),
            indent = indent
        );
        if !entry.resource_name().is_empty() {
            let _ = write!(
                self.out,
                "  {}:{}",
                entry.resource_name(),
                entry.line_number().unwrap_or(0)
            );
        }
        self.out.push('\n');

        for info in node.deopt_infos() {
            let mut frames = info.stack.iter();
            if let Some(top) = frames.next() {
                let _ = writeln!(
                    self.out,
                    "{:pad$};;; deopted at script_id: {} position: {} with reason '{}'.",
                    "",
                    top.script_id.unwrap_or(0),
                    top.position,
                    info.reason,
                    pad = indent + 10
                );
            }
            for frame in frames {
                let _ = writeln!(
                    self.out,
                    "{:pad$};;;     Inline point: script_id {} position: {}.",
                    "",
                    frame.script_id.unwrap_or(0),
                    frame.position,
                    pad = indent + 10
                );
            }
        }
        if node.dropped_deopt_infos() > 0 {
            let _ = writeln!(
                self.out,
                "{:pad$};;; {} more deopts not recorded",
                "",
                node.dropped_deopt_infos(),
                pad = indent + 10
            );
        }

        if let Some(reason) = entry.bailout_reason() {
            let _ = writeln!(
                self.out,
                "{:pad$} bailed out due to '{}'",
                "",
                reason,
                pad = indent + 10
            );
        }
    }
}

impl TreeVisitor for TreePrinter {
    fn before_traversing_child(&mut self, _parent: &ProfileNode, child: &ProfileNode) {
        self.depth += 1;
        self.print_node(child);
    }

    fn after_child_traversed(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {
        self.depth -= 1;
    }
}
