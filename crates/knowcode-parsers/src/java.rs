use crate::ast::{
    doc_comment_before, field_text, named_children, node_location, node_text,
};
use crate::error::{ParserError, Result};
use crate::frontend::{module_entity, source_slice, ParserFrontend};
use crate::language::Language;
use knowcode_graph::{
    symbolic_target, Entity, EntityKind, ParseOutcome, Relationship, RelationshipKind,
};
use tree_sitter::{Node, Parser};

/// Java frontend: classes, interfaces, enums, methods, imports, local call
/// sites, and inheritance (extends + implements).
pub struct JavaFrontend {
    parser: Parser,
}

impl JavaFrontend {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::Java.tree_sitter_language()?)
            .map_err(|e| ParserError::GrammarError(e.to_string()))?;
        Ok(Self { parser })
    }
}

impl ParserFrontend for JavaFrontend {
    fn language(&self) -> Language {
        Language::Java
    }

    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        let Some(tree) = self.parser.parse(source, None) else {
            return ParseOutcome::failed(file_path, "tree-sitter produced no tree");
        };
        let root = tree.root_node();

        let mut outcome = ParseOutcome::new(file_path);
        let module = module_entity(file_path, source, Language::Java);
        let module_id = module.id.clone();
        outcome.entities.push(module);

        for child in named_children(root) {
            match child.kind() {
                "import_declaration" => {
                    if let Some(target) = import_name(child, source) {
                        outcome.relationships.push(Relationship::new(
                            &module_id,
                            symbolic_target(&target),
                            RelationshipKind::Imports,
                        ));
                    }
                }
                "class_declaration" | "interface_declaration" | "enum_declaration" => {
                    extract_type(&mut outcome, child, source, file_path, &module_id);
                }
                _ => {}
            }
        }

        if root.has_error() {
            outcome
                .errors
                .push("syntax errors reported by parser".to_string());
        }
        outcome
    }
}

fn extract_type(
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
    class.docstring = doc_comment_before(node, source);
    let class_id = class.id.clone();
    outcome.entities.push(class);
    outcome.relationships.push(Relationship::new(
        module_id,
        class_id.clone(),
        RelationshipKind::Contains,
    ));

    // extends
    if let Some(superclass) = node.child_by_field_name("superclass") {
        for base in named_children(superclass) {
            outcome.relationships.push(Relationship::new(
                class_id.clone(),
                symbolic_target(&node_text(base, source)),
                RelationshipKind::Inherits,
            ));
        }
    }
    // implements
    if let Some(interfaces) = node.child_by_field_name("interfaces") {
        let mut stack = named_children(interfaces);
        while let Some(child) = stack.pop() {
            if child.kind() == "type_identifier" {
                outcome.relationships.push(Relationship::new(
                    class_id.clone(),
                    symbolic_target(&node_text(child, source)),
                    RelationshipKind::Inherits,
                ));
            } else {
                stack.extend(named_children(child));
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for member in named_children(body) {
            match member.kind() {
                "method_declaration" | "constructor_declaration" => {
                    extract_method(outcome, member, source, file_path, &class_id, &name);
                }
                // nested types are modeled one level deep, like the other frontends
                _ => {}
            }
        }
    }
}

fn extract_method(
    outcome: &mut ParseOutcome,
    node: Node,
    source: &str,
    file_path: &str,
    class_id: &str,
    class_name: &str,
) {
    let Some(name) = field_text(node, "name", source) else {
        return;
    };
    let qualified = format!("{class_name}.{name}");

    let location = node_location(node, file_path);
    let mut entity = Entity::new(EntityKind::Method, &name, &qualified, location.clone())
        .with_source(source_slice(source, location.start_line, location.end_line));
    entity.signature = method_signature(node, source);
    entity.docstring = doc_comment_before(node, source);
    let entity_id = entity.id.clone();
    outcome.entities.push(entity);
    outcome.relationships.push(Relationship::new(
        class_id,
        entity_id.clone(),
        RelationshipKind::Contains,
    ));

    if let Some(body) = node.child_by_field_name("body") {
        collect_calls(body, source, &entity_id, outcome);
    }
}

fn collect_calls(node: Node, source: &str, caller_id: &str, outcome: &mut ParseOutcome) {
    let mut cursor = node.walk();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "method_invocation" {
            if let Some(callee) = invocation_name(current, source) {
                outcome.relationships.push(
                    Relationship::new(caller_id, symbolic_target(&callee), RelationshipKind::Calls)
                        .with_attr("line", (current.start_position().row + 1) as i64),
                );
            }
        }
        for child in current.children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// `this.save()` reduces to `save`; `repo.find()` keeps the qualifier.
fn invocation_name(node: Node, source: &str) -> Option<String> {
    let name = field_text(node, "name", source)?;
    match node.child_by_field_name("object") {
        None => Some(name),
        Some(object) if object.kind() == "this" => Some(name),
        Some(object) if object.kind() == "identifier" => {
            Some(format!("{}.{name}", node_text(object, source)))
        }
        Some(_) => Some(name),
    }
}

fn import_name(node: Node, source: &str) -> Option<String> {
    named_children(node)
        .into_iter()
        .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"))
        .map(|c| node_text(c, source))
}

/// Return type + name + parameters, without modifiers or body.
fn method_signature(node: Node, source: &str) -> Option<String> {
    let name = field_text(node, "name", source)?;
    let params = field_text(node, "parameters", source).unwrap_or_default();
    let return_type = field_text(node, "type", source);
    Some(match return_type {
        Some(ty) => format!("{ty} {name}{params}"),
        None => format!("{name}{params}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"package com.shop;

import com.shop.store.Repository;

/** Order processing service. */
public class OrderService extends BaseService implements Auditable {

    /** Place an order. */
    public Receipt place(Order order) {
        this.validate(order);
        return repo.save(order);
    }

    private boolean validate(Order order) {
        return order != null;
    }
}
"#;

    fn parse(source: &str) -> ParseOutcome {
        let mut frontend = JavaFrontend::new().unwrap();
        frontend.parse("src/OrderService.java", source)
    }

    #[test]
    fn test_entities_extracted() {
        let outcome = parse(SAMPLE);
        let qnames: Vec<&str> = outcome
            .entities
            .iter()
            .map(|e| e.qualified_name.as_str())
            .collect();
        assert!(qnames.contains(&"OrderService"));
        assert!(qnames.contains(&"OrderService.place"));
        assert!(qnames.contains(&"OrderService.validate"));
    }

    #[test]
    fn test_extends_and_implements() {
        let outcome = parse(SAMPLE);
        let targets: Vec<&str> = outcome
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Inherits)
            .map(|r| r.target_id.as_str())
            .collect();
        assert!(targets.contains(&"ref::BaseService"));
        assert!(targets.contains(&"ref::Auditable"));
    }

    #[test]
    fn test_import_edge() {
        let outcome = parse(SAMPLE);
        assert!(outcome.relationships.iter().any(|r| {
            r.kind == RelationshipKind::Imports && r.target_id == "ref::com.shop.store.Repository"
        }));
    }

    #[test]
    fn test_this_invocation_reduces() {
        let outcome = parse(SAMPLE);
        let calls: Vec<(&str, &str)> = outcome
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Calls)
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();
        assert!(calls.contains(&("src/OrderService.java::OrderService.place", "ref::validate")));
        assert!(calls.contains(&("src/OrderService.java::OrderService.place", "ref::repo.save")));
    }

    #[test]
    fn test_javadoc_docstring_and_signature() {
        let outcome = parse(SAMPLE);
        let place = outcome
            .entities
            .iter()
            .find(|e| e.qualified_name == "OrderService.place")
            .unwrap();
        assert_eq!(place.docstring.as_deref(), Some("Place an order."));
        assert_eq!(place.signature.as_deref(), Some("Receipt place(Order order)"));
    }
}
