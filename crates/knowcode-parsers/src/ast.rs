//! Small helpers shared by the tree-sitter frontends.

use knowcode_graph::Location;
use tree_sitter::Node;

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub(crate) fn node_text(node: Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

pub(crate) fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|child| node_text(child, source))
}

pub(crate) fn node_location(node: Node, file_path: &str) -> Location {
    Location::new(
        file_path,
        node.start_position().row + 1,
        node.end_position().row + 1,
    )
}

/// Documentation comment (`/** ... */`) directly above a node, cleaned of
/// comment markers.
pub(crate) fn doc_comment_before(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_named_sibling()?;
    if prev.kind() != "comment" && prev.kind() != "block_comment" {
        return None;
    }
    let text = node_text(prev, source);
    if !text.starts_with("/**") {
        return None;
    }
    let cleaned: Vec<String> = text
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}

/// Header text of a definition: everything before its body, collapsed to
/// single spaces. Used as the signature.
pub(crate) fn header_before_body(node: Node, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let header = &source[node.start_byte()..body.start_byte()];
    let header = header.trim_end().trim_end_matches(':').trim_end();
    Some(header.split_whitespace().collect::<Vec<_>>().join(" "))
}
