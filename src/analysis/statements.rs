//! Executable statement groups.
//!
//! A statement group is a run of consecutive simple statements sharing one
//! execution path (the chain of branch decisions guarding them). Groups are
//! the unit the relevance selection works on when mapping requirements to
//! code lines.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::error::Result;

const COLLECTED_NODE_TYPES: [&str; 5] = [
    "expression_statement",
    "return_statement",
    "break_statement",
    "continue_statement",
    "comment",
];

fn space_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("static regex"))
}

/// A group of statement lines on one execution path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementGroup {
    /// 0-based line numbers of the grouped statements.
    pub line_numbers: Vec<usize>,
    /// Branch decisions guarding the group, outermost first, e.g.
    /// `IF (raw > limit) ==> TRUE`.
    pub path: Vec<String>,
    /// Identifiers referenced by the grouped statements.
    pub symbols: Vec<String>,
}

impl StatementGroup {
    /// Pretty form used in prompts: the path followed by the source lines,
    /// with `...` between non-adjacent lines.
    pub fn render(&self, code: &str) -> String {
        let lines: Vec<&str> = code.split('\n').collect();
        let path = self.path.join("\n -> ");
        let mut body = String::new();
        for (i, line_number) in self.line_numbers.iter().enumerate() {
            if i > 0 && self.line_numbers[i] != self.line_numbers[i - 1] + 1 {
                body.push_str("...\n");
            }
            body.push_str(lines.get(*line_number).copied().unwrap_or_default());
            body.push('\n');
        }
        format!("Path: {path}\nLines:\n{body}")
    }
}

/// True when `prefix` is a leading segment of `path`.
pub fn is_path_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

struct CollectedNode {
    line_number: usize,
    path: Vec<String>,
    symbols: Vec<String>,
}

enum Collected {
    Node(CollectedNode),
    List(Vec<Collected>),
}

/// Extract the executable statement groups of `code` in source order.
pub fn executable_statement_groups(code: &str) -> Result<Vec<StatementGroup>> {
    let tree = super::parse(code)?;
    let collected = collect(tree.root_node(), code, &[]);
    let nested = match collected {
        Collected::List(items) => items,
        node @ Collected::Node(_) => vec![node],
    };
    let mut groups = Vec::new();
    flatten(nested, &mut groups, &mut false);
    Ok(groups.into_iter().map(group_from_nodes).collect())
}

fn group_from_nodes(nodes: Vec<CollectedNode>) -> StatementGroup {
    let mut seen = std::collections::HashSet::new();
    let mut symbols = Vec::new();
    for node in &nodes {
        for symbol in &node.symbols {
            if seen.insert(symbol.clone()) {
                symbols.push(symbol.clone());
            }
        }
    }
    StatementGroup {
        path: nodes.first().map(|n| n.path.clone()).unwrap_or_default(),
        line_numbers: nodes.into_iter().map(|n| n.line_number).collect(),
        symbols,
    }
}

fn flatten(items: Vec<Collected>, groups: &mut Vec<Vec<CollectedNode>>, last_was_list: &mut bool) {
    for item in items {
        match item {
            Collected::List(nested) => {
                // Groups never span a nesting boundary.
                *last_was_list = true;
                flatten(nested, groups, last_was_list);
                *last_was_list = true;
            }
            Collected::Node(node) => {
                if groups.is_empty() || *last_was_list {
                    groups.push(Vec::new());
                }
                if let Some(group) = groups.last_mut() {
                    group.push(node);
                }
                *last_was_list = false;
            }
        }
    }
}

/// Path labels per branching node kind, keyed by the child field they guard.
/// `"*"` labels every child of the node.
fn path_labels(node: Node<'_>, source: &str) -> Vec<(&'static str, String)> {
    let condition_field = match node.kind() {
        "if_statement" | "while_statement" | "for_statement" | "do_statement"
        | "switch_statement" => "condition",
        "case_statement" => "value",
        _ => return Vec::new(),
    };
    let condition = node.child_by_field_name(condition_field);
    let condition_text = match condition {
        Some(condition) => condition
            .utf8_text(source.as_bytes())
            .unwrap_or("None")
            .replace('\n', ""),
        None => "None".to_string(),
    };
    let clean = |label: String| space_run_regex().replace_all(&label, " ").into_owned();
    match node.kind() {
        "if_statement" => vec![
            ("consequence", clean(format!("IF {condition_text} ==> TRUE"))),
            ("alternative", clean(format!("IF {condition_text} ==> FALSE"))),
        ],
        "while_statement" => vec![("body", clean(format!("WHILE {condition_text} ==> TRUE")))],
        "for_statement" => vec![("body", clean(format!("FOR ({condition_text}) ==> TRUE")))],
        "do_statement" => vec![("body", clean(format!("DO-WHILE {condition_text} ==> TRUE")))],
        "switch_statement" => vec![("body", clean(format!("SWITCH {condition_text} ==> ENTERED")))],
        "case_statement" => {
            let label = if condition.is_none() {
                "DEFAULT ==> ENTERED".to_string()
            } else {
                clean(format!("CASE {condition_text} ==> ENTERED"))
            };
            vec![("*", label)]
        }
        _ => Vec::new(),
    }
}

fn collect(node: Node<'_>, source: &str, current_path: &[String]) -> Collected {
    if COLLECTED_NODE_TYPES.contains(&node.kind()) {
        return Collected::Node(CollectedNode {
            line_number: node.start_position().row,
            path: current_path.to_vec(),
            symbols: super::collect_symbols(node, source),
        });
    }

    let labels = path_labels(node, source);
    let mut items = Vec::new();
    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        let label = labels
            .iter()
            .find(|(field, _)| {
                *field != "*"
                    && node
                        .child_by_field_name(field)
                        .is_some_and(|field_child| field_child == child)
            })
            .or_else(|| labels.iter().find(|(field, _)| *field == "*"))
            .map(|(_, label)| label.clone());

        let child_path: Vec<String> = match label {
            Some(label) => {
                let mut path = current_path.to_vec();
                path.push(label);
                path
            }
            None => current_path.to_vec(),
        };
        items.push(collect(child, source, &child_path));
    }
    Collected::List(items)
}
