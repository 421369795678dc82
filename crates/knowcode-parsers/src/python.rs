use crate::ast::{field_text, header_before_body, named_children, node_location, node_text};
use crate::error::{ParserError, Result};
use crate::frontend::{module_entity, source_slice, ParserFrontend};
use crate::language::Language;
use knowcode_graph::{
    symbolic_target, Entity, EntityKind, ParseOutcome, Relationship, RelationshipKind,
};
use tree_sitter::{Node, Parser};

/// Python frontend: modules, classes, functions, methods, imports, local
/// call sites, and inheritance.
pub struct PythonFrontend {
    parser: Parser,
}

impl PythonFrontend {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::Python.tree_sitter_language()?)
            .map_err(|e| ParserError::GrammarError(e.to_string()))?;
        Ok(Self { parser })
    }
}

impl ParserFrontend for PythonFrontend {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        let Some(tree) = self.parser.parse(source, None) else {
            return ParseOutcome::failed(file_path, "tree-sitter produced no tree");
        };
        let root = tree.root_node();

        let mut outcome = ParseOutcome::new(file_path);
        let mut module = module_entity(file_path, source, Language::Python);
        if let Some(doc) = block_docstring(root, source) {
            module.docstring = Some(doc);
        }
        let module_id = module.id.clone();
        outcome.entities.push(module);

        for child in named_children(root) {
            extract_top_level(&mut outcome, child, source, file_path, &module_id);
        }

        if root.has_error() {
            // Partial trees are still useful; flag instead of dropping.
            outcome
                .errors
                .push("syntax errors reported by parser".to_string());
        }
        outcome
    }
}

fn extract_top_level(
    outcome: &mut ParseOutcome,
    node: Node,
    source: &str,
    file_path: &str,
    module_id: &str,
) {
    let node = peel_decorators(node);
    match node.kind() {
        "import_statement" | "import_from_statement" => {
            for target in import_targets(node, source) {
                outcome.relationships.push(Relationship::new(
                    module_id,
                    symbolic_target(&target),
                    RelationshipKind::Imports,
                ));
            }
        }
        "class_definition" => extract_class(outcome, node, source, file_path, module_id),
        "function_definition" => {
            extract_function(outcome, node, source, file_path, module_id, None);
        }
        _ => {}
    }
}

fn extract_class(
    outcome: &mut ParseOutcome,
    node: Node,
    source: &str,
    file_path: &str,
    module_id: &str,
) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };

    let location = node_location(node, file_path);
    let mut class = Entity::new(EntityKind::Class, &name, &name, location.clone())
        .with_source(source_slice(source, location.start_line, location.end_line));
    if let Some(body) = node.child_by_field_name("body") {
        if let Some(doc) = block_docstring(body, source) {
            class.docstring = Some(doc);
        }
    }
    let class_id = class.id.clone();
    outcome.entities.push(class);
    outcome.relationships.push(Relationship::new(
        module_id,
        class_id.clone(),
        RelationshipKind::Contains,
    ));

    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        for base in named_children(superclasses) {
            if matches!(base.kind(), "identifier" | "attribute") {
                let base_name = node_text(base, source);
                outcome.relationships.push(Relationship::new(
                    class_id.clone(),
                    symbolic_target(&base_name),
                    RelationshipKind::Inherits,
                ));
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            let child = peel_decorators(child);
            if child.kind() == "function_definition" {
                extract_function(outcome, child, source, file_path, &class_id, Some(&name));
            }
        }
    }
}

fn extract_function(
    outcome: &mut ParseOutcome,
    node: Node,
    source: &str,
    file_path: &str,
    parent_id: &str,
    class_name: Option<&str>,
) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let qualified = match class_name {
        Some(class) => format!("{class}.{name}"),
        None => name.clone(),
    };
    let kind = if class_name.is_some() {
        EntityKind::Method
    } else {
        EntityKind::Function
    };

    let location = node_location(node, file_path);
    let mut entity = Entity::new(kind, &name, &qualified, location.clone())
        .with_source(source_slice(source, location.start_line, location.end_line));
    entity.signature = header_before_body(node, source);
    if let Some(body) = node.child_by_field_name("body") {
        if let Some(doc) = block_docstring(body, source) {
            entity.docstring = Some(doc);
        }
    }
    let entity_id = entity.id.clone();
    outcome.entities.push(entity);
    outcome.relationships.push(Relationship::new(
        parent_id,
        entity_id.clone(),
        RelationshipKind::Contains,
    ));

    if let Some(body) = node.child_by_field_name("body") {
        collect_calls(body, source, &entity_id, outcome);
    }
}

/// Record a `calls` relationship for every call expression under `node`.
fn collect_calls(node: Node, source: &str, caller_id: &str, outcome: &mut ParseOutcome) {
    let mut cursor = node.walk();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "call" {
            if let Some(function) = current.child_by_field_name("function") {
                if let Some(callee) = call_name(function, source) {
                    outcome.relationships.push(
                        Relationship::new(
                            caller_id,
                            symbolic_target(&callee),
                            RelationshipKind::Calls,
                        )
                        .with_attr("line", (current.start_position().row + 1) as i64),
                    );
                }
            }
        }
        // Nested defs keep their calls attributed to the enclosing entity,
        // matching the single-level entity model.
        for child in current.children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// Extract a callable name from a call's function node.
/// `self.save()` / `cls.save()` reduce to `save` so class-scope resolution
/// can find the sibling method.
fn call_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attr = field_text(node, "attribute", source)?;
            let object_text = node_text(object, source);
            if object_text == "self" || object_text == "cls" {
                Some(attr)
            } else if object.kind() == "identifier" {
                Some(format!("{object_text}.{attr}"))
            } else {
                Some(attr)
            }
        }
        _ => None,
    }
}

/// Imported module names from an import statement.
fn import_targets(node: Node, source: &str) -> Vec<String> {
    let mut targets = Vec::new();
    if node.kind() == "import_from_statement" {
        if let Some(module) = node.child_by_field_name("module_name") {
            let text = node_text(module, source);
            let trimmed = text.trim_start_matches('.');
            if !trimmed.is_empty() {
                targets.push(trimmed.to_string());
            }
        }
        return targets;
    }
    for child in named_children(node) {
        match child.kind() {
            "dotted_name" => targets.push(node_text(child, source)),
            "aliased_import" => {
                if let Some(name) = child.child_by_field_name("name") {
                    targets.push(node_text(name, source));
                }
            }
            _ => {}
        }
    }
    targets
}

/// Docstring of a block: its first statement, when that is a string literal.
fn block_docstring(block: Node, source: &str) -> Option<String> {
    let first = named_children(block)
        .into_iter()
        .find(|n| n.is_named() && n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = named_children(first)
        .into_iter()
        .find(|n| n.kind() == "string")?;
    Some(clean_string_literal(&node_text(string, source)))
}

/// Strip quotes and prefixes from a Python string literal.
fn clean_string_literal(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(|c: char| "rbufRBUF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.starts_with(quote) && trimmed.ends_with(quote) && trimmed.len() >= 2 * quote.len()
        {
            return trimmed[quote.len()..trimmed.len() - quote.len()]
                .trim()
                .to_string();
        }
    }
    trimmed.to_string()
}

fn peel_decorators(node: Node) -> Node {
    if node.kind() == "decorated_definition" {
        if let Some(definition) = node.child_by_field_name("definition") {
            return definition;
        }
    }
    node
}
