use crate::frontend::{module_entity, ParserFrontend};
use crate::language::Language;
use knowcode_graph::{
    Entity, EntityKind, Location, ParseOutcome, Relationship, RelationshipKind,
};
use regex::Regex;

/// YAML frontend. Every mapping key becomes a `config_key` entity with a
/// dotted qualified name (`server.port`), contained by its parent key.
///
/// The document is validated with `serde_yaml` first; key locations come
/// from an indentation scan because the YAML object model drops spans.
pub struct YamlFrontend {
    key_line: Regex,
}

impl YamlFrontend {
    pub fn new() -> Self {
        Self {
            // captures indentation and a simple scalar key
            key_line: Regex::new(r"^(\s*)([A-Za-z0-9_][A-Za-z0-9_.-]*):(\s|$)").unwrap(),
        }
    }
}

impl Default for YamlFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserFrontend for YamlFrontend {
    fn language(&self) -> Language {
        Language::Yaml
    }

    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        if let Err(e) = serde_yaml::from_str::<serde_yaml::Value>(source) {
            return ParseOutcome::failed(file_path, format!("invalid YAML: {e}"));
        }

        let mut outcome = ParseOutcome::new(file_path);
        let module = module_entity(file_path, source, Language::Yaml);
        let module_id = module.id.clone();
        outcome.entities.push(module);

        // (indent, qualified name, entity id) for the current key path
        let mut stack: Vec<(usize, String, String)> = Vec::new();
        let mut block_scalar_indent: Option<usize> = None;

        for (i, line) in source.lines().enumerate() {
            let indent = line.len() - line.trim_start().len();
            if line.trim().is_empty() {
                continue;
            }
            // skip the body of | and > block scalars
            if let Some(scalar_indent) = block_scalar_indent {
                if indent > scalar_indent {
                    continue;
                }
                block_scalar_indent = None;
            }
            if line.trim_start().starts_with('#') || line.trim_start().starts_with('-') {
                continue;
            }

            let Some(captures) = self.key_line.captures(line) else {
                continue;
            };
            let key = captures[2].to_string();

            while stack.last().map(|(depth, _, _)| *depth >= indent) == Some(true) {
                stack.pop();
            }
            let (qualified, parent_id) = match stack.last() {
                Some((_, parent_path, parent_id)) => {
                    (format!("{parent_path}.{key}"), parent_id.clone())
                }
                None => (key.clone(), module_id.clone()),
            };

            let entity = Entity::new(
                EntityKind::ConfigKey,
                &key,
                &qualified,
                Location::new(file_path, i + 1, i + 1),
            );
            let entity_id = entity.id.clone();
            outcome.entities.push(entity);
            outcome.relationships.push(Relationship::new(
                parent_id,
                entity_id.clone(),
                RelationshipKind::Contains,
            ));
            stack.push((indent, qualified, entity_id));

            let value = line[captures.get(0).unwrap().end()..].trim();
            if value == "|" || value == ">" || value.starts_with("|-") || value.starts_with(">-") {
                block_scalar_indent = Some(indent);
            }
        }

        outcome
    }
}
