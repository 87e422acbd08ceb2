//! Structure-preserving line pruning.
//!
//! Removes every statement that does not touch a kept line while preserving
//! the syntactic skeleton around the survivors: conditions, loop headers,
//! braces and function signatures stay so the result still reads as the
//! same function.

use std::sync::OnceLock;

use regex::Regex;
use tree_sitter::Node;

use crate::error::Result;

/// Child roles that must never be removed from their parent node. `"*"`
/// protects every child.
fn protected_children(kind: &str) -> &'static [&'static str] {
    match kind {
        "if_statement" => &["condition"],
        "for_statement" => &["initializer", "condition", "update"],
        "while_statement" => &["condition"],
        "switch_statement" => &["condition"],
        "case_statement" => &["value", "break_statement"],
        "do_statement" => &["condition"],
        "function_definition" => &["type", "declarator", "parameters"],
        "else_clause" => &["condition"],
        "expression_statement" | "return_statement" | "break_statement"
        | "continue_statement" | "comment" => &["*"],
        _ => &[],
    }
}

const PROTECTED_LEAFS: [&str; 16] = [
    ":", ",", ";", "{", "}", "(", ")", "if", "else", "for", "while", "do", "switch", "case",
    "default", "comment",
];

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\n\s*)+\n").expect("static regex"))
}

/// Prune `code` down to the statements touching `lines_to_keep` (0-based).
pub fn prune_code(code: &str, lines_to_keep: &[usize]) -> Result<String> {
    let tree = super::parse(code)?;
    let ranges = merge_ranges(removable_ranges(tree.root_node(), lines_to_keep));

    let mut pruned = code.to_string();
    for (start, end) in ranges.into_iter().rev() {
        pruned.replace_range(start..end, "");
    }
    Ok(blank_run_regex().replace_all(&pruned, "\n").into_owned())
}

fn contains_any_line(node: Node<'_>, lines: &[usize]) -> bool {
    let start = node.start_position().row;
    let end = node.end_position().row;
    lines.iter().any(|line| start <= *line && *line <= end)
}

fn is_protected(child: Node<'_>, parent: Node<'_>) -> bool {
    let roles = protected_children(parent.kind());
    if roles.contains(&"*") {
        return true;
    }
    roles.iter().any(|role| {
        parent
            .child_by_field_name(role)
            .is_some_and(|field_child| field_child == child)
            || child.kind() == *role
    })
}

fn removable_ranges(node: Node<'_>, lines: &[usize]) -> Vec<(usize, usize)> {
    // Pass through blocks so removals happen per statement inside them.
    if node.kind() == "compound_statement" {
        let mut ranges = Vec::new();
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                ranges.extend(removable_ranges(child, lines));
            }
        }
        return ranges;
    }

    if !contains_any_line(node, lines) && !PROTECTED_LEAFS.contains(&node.kind()) {
        return vec![(node.start_byte(), node.end_byte())];
    }

    let mut ranges = Vec::new();
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if is_protected(child, node) {
                continue;
            }
            ranges.extend(removable_ranges(child, lines));
        }
    }
    ranges
}

fn merge_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, previous_end)) if start <= *previous_end => {
                *previous_end = (*previous_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}
