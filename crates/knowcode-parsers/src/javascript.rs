use crate::ast::{
    doc_comment_before, field_text, header_before_body, named_children, node_location, node_text,
};
use crate::error::{ParserError, Result};
use crate::frontend::{module_entity, source_slice, ParserFrontend};
use crate::language::Language;
use knowcode_graph::{
    symbolic_target, Entity, EntityKind, ParseOutcome, Relationship, RelationshipKind,
};
use std::path::Path;
use tree_sitter::{Node, Parser};

/// JavaScript / TypeScript frontend. One instance handles one grammar; the
/// registry installs both variants.
pub struct JsFrontend {
    parser: Parser,
    language: Language,
}

impl JsFrontend {
    pub fn javascript() -> Result<Self> {
        Self::with_language(Language::JavaScript)
    }

    pub fn typescript() -> Result<Self> {
        Self::with_language(Language::TypeScript)
    }

    fn with_language(language: Language) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.tree_sitter_language()?)
            .map_err(|e| ParserError::GrammarError(e.to_string()))?;
        Ok(Self { parser, language })
    }
}

impl ParserFrontend for JsFrontend {
    fn language(&self) -> Language {
        self.language
    }

    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        let Some(tree) = self.parser.parse(source, None) else {
            return ParseOutcome::failed(file_path, "tree-sitter produced no tree");
        };
        let root = tree.root_node();

        let mut outcome = ParseOutcome::new(file_path);
        let module = module_entity(file_path, source, self.language);
        let module_id = module.id.clone();
        outcome.entities.push(module);

        for child in named_children(root) {
            extract_top_level(&mut outcome, child, source, file_path, &module_id);
        }

        if root.has_error() {
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
    let node = peel_export(node);
    match node.kind() {
        "import_statement" => {
            if let Some(target) = import_module_name(node, source) {
                outcome.relationships.push(Relationship::new(
                    module_id,
                    symbolic_target(&target),
                    RelationshipKind::Imports,
                ));
            }
        }
        "class_declaration" | "abstract_class_declaration" => {
            extract_class(outcome, node, source, file_path, module_id);
        }
        "interface_declaration" => {
            // TS interfaces participate in inheritance like classes do
            extract_class(outcome, node, source, file_path, module_id);
        }
        "function_declaration" | "generator_function_declaration" => {
            extract_function(outcome, node, source, file_path, module_id, None);
        }
        "lexical_declaration" | "variable_declaration" => {
            extract_arrow_functions(outcome, node, source, file_path, module_id);
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
    class.docstring = doc_comment_before(node, source);
    let class_id = class.id.clone();
    outcome.entities.push(class);
    outcome.relationships.push(Relationship::new(
        module_id,
        class_id.clone(),
        RelationshipKind::Contains,
    ));

    // `extends Base` lives under class_heritage; the TS grammar nests an
    // extends_clause inside it, so walk descendants for the base names
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "class_heritage" && child.kind() != "extends_clause" {
            continue;
        }
        let mut stack = named_children(child);
        while let Some(base) = stack.pop() {
            match base.kind() {
                "identifier" | "member_expression" | "type_identifier" => {
                    outcome.relationships.push(Relationship::new(
                        class_id.clone(),
                        symbolic_target(&node_text(base, source)),
                        RelationshipKind::Inherits,
                    ));
                }
                _ => stack.extend(named_children(base)),
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for member in named_children(body) {
            if member.kind() == "method_definition" {
                extract_function(outcome, member, source, file_path, &class_id, Some(&name));
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
    entity.docstring = doc_comment_before(node, source);
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

/// `const f = (a) => ...` declarations become function entities.
fn extract_arrow_functions(
    outcome: &mut ParseOutcome,
    node: Node,
    source: &str,
    file_path: &str,
    module_id: &str,
) {
    for declarator in named_children(node) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        if !matches!(value.kind(), "arrow_function" | "function_expression") {
            continue;
        }
        let Some(name) = field_text(declarator, "name", source) else {
            continue;
        };

        let location = node_location(node, file_path);
        let mut entity = Entity::new(EntityKind::Function, &name, &name, location.clone())
            .with_source(source_slice(source, location.start_line, location.end_line));
        entity.docstring = doc_comment_before(node, source);
        let entity_id = entity.id.clone();
        outcome.entities.push(entity);
        outcome.relationships.push(Relationship::new(
            module_id,
            entity_id.clone(),
            RelationshipKind::Contains,
        ));

        if let Some(body) = value.child_by_field_name("body") {
            collect_calls(body, source, &entity_id, outcome);
        }
    }
}

fn collect_calls(node: Node, source: &str, caller_id: &str, outcome: &mut ParseOutcome) {
    let mut cursor = node.walk();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "call_expression" {
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
        for child in current.children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// `this.save()` reduces to `save`; `util.clamp()` keeps the qualifier.
fn call_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "member_expression" => {
            let object = node.child_by_field_name("object")?;
            let property = field_text(node, "property", source)?;
            if object.kind() == "this" {
                Some(property)
            } else if object.kind() == "identifier" {
                Some(format!("{}.{property}", node_text(object, source)))
            } else {
                Some(property)
            }
        }
        _ => None,
    }
}

/// Module name from `import ... from './relative/path'` or a bare specifier.
fn import_module_name(node: Node, source: &str) -> Option<String> {
    let spec = field_text(node, "source", source)?;
    let spec = spec.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let trimmed = spec.trim_start_matches("./").trim_start_matches("../");
    if trimmed.is_empty() {
        return None;
    }
    let stem = Path::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(trimmed);
    Some(stem.to_string())
}

fn peel_export(node: Node) -> Node {
    if node.kind() == "export_statement" {
        if let Some(declaration) = node.child_by_field_name("declaration") {
            return declaration;
        }
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import { clamp } from './util';

/** Shopping cart. */
export class Cart extends Container {
  /** Add an item. */
  addItem(item) {
    this.validate(item);
    return clamp(item.qty);
  }

  validate(item) {
    return item != null;
  }
}

export const total = (items) => items.reduce(sum, 0);

function sum(a, b) {
  return a + b;
}
"#;

    fn parse(source: &str) -> ParseOutcome {
        let mut frontend = JsFrontend::javascript().unwrap();
        frontend.parse("web/cart.js", source)
    }

    #[test]
    fn test_entities_extracted() {
        let outcome = parse(SAMPLE);
        let qnames: Vec<&str> = outcome
            .entities
            .iter()
            .map(|e| e.qualified_name.as_str())
            .collect();
        assert!(qnames.contains(&"cart"));
        assert!(qnames.contains(&"Cart"));
        assert!(qnames.contains(&"Cart.addItem"));
        assert!(qnames.contains(&"Cart.validate"));
        assert!(qnames.contains(&"total"));
        assert!(qnames.contains(&"sum"));
    }

    #[test]
    fn test_jsdoc_becomes_docstring() {
        let outcome = parse(SAMPLE);
        let cart = outcome
            .entities
            .iter()
            .find(|e| e.qualified_name == "Cart")
            .unwrap();
        assert_eq!(cart.docstring.as_deref(), Some("Shopping cart."));
    }

    #[test]
    fn test_import_and_inherit_edges() {
        let outcome = parse(SAMPLE);
        assert!(outcome
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::Imports && r.target_id == "ref::util"));
        assert!(outcome
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::Inherits && r.target_id == "ref::Container"));
    }

    #[test]
    fn test_this_call_reduces_to_method_name() {
        let outcome = parse(SAMPLE);
        let calls: Vec<(&str, &str)> = outcome
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Calls)
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();
        assert!(calls.contains(&("web/cart.js::Cart.addItem", "ref::validate")));
        assert!(calls.contains(&("web/cart.js::Cart.addItem", "ref::clamp")));
    }

    #[test]
    fn test_typescript_interface() {
        let mut frontend = JsFrontend::typescript().unwrap();
        let outcome = frontend.parse(
            "web/types.ts",
            "interface Store {\n  get(id: string): Item;\n}\n",
        );
        assert!(outcome
            .entities
            .iter()
            .any(|e| e.kind == EntityKind::Class && e.qualified_name == "Store"));
    }
}
