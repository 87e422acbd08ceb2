//! tree-sitter based C/C++ source analysis: line pruning, executable
//! statement groups, and symbol-indexed context reduction.

pub mod index;
pub mod prune;
pub mod relevance;
pub mod statements;

pub use index::CodeIndex;
pub use prune::prune_code;
pub use relevance::relevant_statement_groups;
pub use statements::{executable_statement_groups, StatementGroup};

use crate::error::{Error, Result};

/// Parse C source into a tree-sitter tree.
pub(crate) fn parse(code: &str) -> Result<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_c::LANGUAGE.into())
        .map_err(|e| Error::Internal(format!("failed to load C grammar: {e}")))?;
    parser
        .parse(code, None)
        .ok_or_else(|| Error::Internal("tree-sitter returned no parse tree".into()))
}

/// Collect identifier-like tokens under a node, deduplicated in first-seen
/// order.
pub(crate) fn collect_symbols(node: tree_sitter::Node<'_>, source: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut symbols = Vec::new();
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if matches!(node.kind(), "identifier" | "type_identifier" | "field_identifier") {
            if let Ok(text) = node.utf8_text(source.as_bytes()) {
                if seen.insert(text.to_string()) {
                    symbols.push(text.to_string());
                }
            }
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    symbols
}
