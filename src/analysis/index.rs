//! Symbol index over a translation unit.
//!
//! Backs the AST context reduction: given a target function, keep its full
//! definition plus the collapsed definitions of every top-level symbol the
//! function body references.

use tree_sitter::Node;

use crate::error::Result;

/// A parsed translation unit with symbol lookup.
pub struct CodeIndex {
    source: String,
    tree: tree_sitter::Tree,
}

impl CodeIndex {
    pub fn new(source: String) -> Result<Self> {
        let tree = super::parse(&source)?;
        Ok(Self { source, tree })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn top_level_nodes(&self) -> Vec<Node<'_>> {
        let root = self.tree.root_node();
        (0..root.child_count()).filter_map(|i| root.child(i)).collect()
    }

    fn function_node(&self, name: &str) -> Option<Node<'_>> {
        self.top_level_nodes().into_iter().find(|node| {
            node.kind() == "function_definition"
                && function_name(*node, &self.source).as_deref() == Some(name)
        })
    }

    /// Full text of the named function's definition.
    pub fn function_definition(&self, name: &str) -> Option<String> {
        self.function_node(name).map(|node| self.text(node).to_string())
    }

    /// Number of source lines the named function spans.
    pub fn function_line_count(&self, name: &str) -> Option<usize> {
        self.function_node(name)
            .map(|node| node.end_position().row - node.start_position().row + 1)
    }

    /// Names of all function definitions in source order.
    pub fn function_names(&self) -> Vec<String> {
        self.top_level_nodes()
            .into_iter()
            .filter(|node| node.kind() == "function_definition")
            .filter_map(|node| function_name(node, &self.source))
            .collect()
    }

    /// Collapsed definitions of every top-level symbol the named function's
    /// body references, in source order. `None` when the function is not
    /// defined here.
    pub fn referenced_definitions(&self, name: &str) -> Option<Vec<String>> {
        let target = self.function_node(name)?;
        let referenced = super::collect_symbols(target, &self.source);

        let mut parts = Vec::new();
        for node in self.top_level_nodes() {
            if node == target {
                continue;
            }
            let declared = declared_names(node, &self.source);
            if declared.iter().any(|d| referenced.contains(d)) {
                parts.push(self.collapsed_text(node));
            }
        }
        Some(parts)
    }

    /// Reduced context for the named function: collapsed definitions of all
    /// referenced top-level symbols, then the function itself, in source
    /// order. `None` when the function is not defined here.
    pub fn reduced_context(&self, name: &str) -> Option<String> {
        let mut parts = self.referenced_definitions(name)?;
        parts.push(self.function_definition(name)?);
        Some(parts.join("\n\n"))
    }

    /// Collapse function definitions to prototypes; keep everything else
    /// verbatim.
    fn collapsed_text(&self, node: Node<'_>) -> String {
        if node.kind() == "function_definition" {
            let signature: Vec<&str> = [node.child_by_field_name("type"), node.child_by_field_name("declarator")]
                .into_iter()
                .flatten()
                .map(|part| self.text(part))
                .collect();
            if !signature.is_empty() {
                return format!("{};", signature.join(" "));
            }
        }
        self.text(node).to_string()
    }
}

/// Innermost declared identifier of a declarator chain.
fn declarator_name(node: Node<'_>, source: &str) -> Option<String> {
    if matches!(node.kind(), "identifier" | "type_identifier" | "field_identifier") {
        return node.utf8_text(source.as_bytes()).ok().map(str::to_string);
    }
    if let Some(inner) = node.child_by_field_name("declarator") {
        if let Some(name) = declarator_name(inner, source) {
            return Some(name);
        }
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if let Some(name) = declarator_name(child, source) {
                return Some(name);
            }
        }
    }
    None
}

fn function_name(node: Node<'_>, source: &str) -> Option<String> {
    node.child_by_field_name("declarator")
        .and_then(|declarator| declarator_name(declarator, source))
}

/// Names a top-level node introduces: declarator targets, type names,
/// macro names, enum constants.
fn declared_names(node: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    match node.kind() {
        "function_definition" => {
            names.extend(function_name(node, source));
        }
        "declaration" | "type_definition" => {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                match child.kind() {
                    "init_declarator" | "declarator" | "pointer_declarator"
                    | "array_declarator" | "function_declarator" | "identifier"
                    | "type_identifier" => {
                        names.extend(declarator_name(child, source));
                    }
                    "struct_specifier" | "union_specifier" | "enum_specifier" => {
                        names.extend(specifier_names(child, source));
                    }
                    _ => {}
                }
            }
        }
        "struct_specifier" | "union_specifier" | "enum_specifier" => {
            names.extend(specifier_names(node, source));
        }
        "preproc_def" | "preproc_function_def" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.extend(name.utf8_text(source.as_bytes()).ok().map(str::to_string));
            }
        }
        _ => {}
    }
    names
}

/// The tag name of a struct/union/enum plus, for enums, every enumerator.
fn specifier_names(node: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(name) = node.child_by_field_name("name") {
        names.extend(name.utf8_text(source.as_bytes()).ok().map(str::to_string));
    }
    if node.kind() == "enum_specifier" {
        if let Some(body) = node.child_by_field_name("body") {
            for i in 0..body.child_count() {
                if let Some(child) = body.child(i) {
                    if child.kind() == "enumerator" {
                        if let Some(name) = child.child_by_field_name("name") {
                            names.extend(
                                name.utf8_text(source.as_bytes()).ok().map(str::to_string),
                            );
                        }
                    }
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "\
#define MAX_RAW 200

typedef struct limits { int upper; } limits_t;

static int calibration = 3;

int read_limit(void) {
    return calibration;
}

int unrelated(void) {
    return 0;
}

int clamp_value(int raw) {
    int limit = read_limit();
    if (raw > limit || raw > MAX_RAW) {
        return limit;
    }
    return raw;
}
";

    #[test]
    fn finds_function_definitions() {
        let index = CodeIndex::new(SOURCE.to_string()).unwrap();
        assert_eq!(
            index.function_names(),
            vec!["read_limit", "unrelated", "clamp_value"]
        );
        let definition = index.function_definition("clamp_value").unwrap();
        assert!(definition.starts_with("int clamp_value(int raw)"));
        assert!(definition.ends_with("}"));
        assert_eq!(index.function_line_count("read_limit"), Some(3));
        assert_eq!(index.function_definition("missing"), None);
    }

    #[test]
    fn reduced_context_keeps_referenced_symbols_only() {
        let index = CodeIndex::new(SOURCE.to_string()).unwrap();
        let context = index.reduced_context("clamp_value").unwrap();
        // Referenced function collapses to a prototype.
        assert!(context.contains("int read_limit(void);"));
        assert!(!context.contains("return calibration;"));
        // Referenced macro survives, unrelated function does not.
        assert!(context.contains("#define MAX_RAW 200"));
        assert!(!context.contains("unrelated"));
        // The target function itself stays complete and last.
        assert!(context.ends_with("return raw;\n}"));
    }

    #[test]
    fn reduced_context_missing_function_is_none() {
        let index = CodeIndex::new(SOURCE.to_string()).unwrap();
        assert!(index.reduced_context("missing").is_none());
    }
}
