use crate::frontend::{module_entity, ParserFrontend};
use crate::language::Language;
use knowcode_graph::{
    Entity, EntityKind, Location, ParseOutcome, Relationship, RelationshipKind,
};
use regex::Regex;
use std::collections::HashMap;

/// Markdown frontend. The document becomes a module entity; headings become
/// contained entities following the heading hierarchy, so documentation is
/// searchable next to code.
pub struct MarkdownFrontend {
    heading: Regex,
}

impl MarkdownFrontend {
    pub fn new() -> Self {
        Self {
            heading: Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap(),
        }
    }
}

impl Default for MarkdownFrontend {
    fn default() -> Self {
        Self::new()
    }
}

struct Heading {
    level: usize,
    title: String,
    start_line: usize,
}

impl ParserFrontend for MarkdownFrontend {
    fn language(&self) -> Language {
        Language::Markdown
    }

    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::new(file_path);
        let mut module = module_entity(file_path, source, Language::Markdown);
        let module_id = module.id.clone();

        let lines: Vec<&str> = source.lines().collect();
        let mut headings: Vec<Heading> = Vec::new();
        let mut in_fence = false;
        let mut intro: Vec<&str> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(captures) = self.heading.captures(line) {
                headings.push(Heading {
                    level: captures[1].len(),
                    title: captures[2].to_string(),
                    start_line: i + 1,
                });
            } else if headings.is_empty() && !line.trim().is_empty() {
                intro.push(line.trim());
            }
        }

        if !intro.is_empty() {
            module.docstring = Some(intro.join("\n"));
        }
        outcome.entities.push(module);

        // (level, entity id) stack mirroring the heading hierarchy
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (i, heading) in headings.iter().enumerate() {
            let end_line = headings[i + 1..]
                .iter()
                .find(|next| next.level <= heading.level)
                .map(|next| next.start_line - 1)
                .unwrap_or_else(|| lines.len().max(1));

            // duplicate titles get a positional suffix to keep ids unique
            let occurrence = seen.entry(heading.title.clone()).or_insert(0);
            *occurrence += 1;
            let qualified = if *occurrence == 1 {
                heading.title.clone()
            } else {
                format!("{} ({})", heading.title, occurrence)
            };

            let entity = Entity::new(
                EntityKind::Variable,
                &heading.title,
                &qualified,
                Location::new(file_path, heading.start_line, end_line),
            );
            let entity_id = entity.id.clone();
            outcome.entities.push(entity);

            while stack.last().map(|(level, _)| *level >= heading.level) == Some(true) {
                stack.pop();
            }
            let parent_id = stack
                .last()
                .map(|(_, id)| id.clone())
                .unwrap_or_else(|| module_id.clone());
            outcome.relationships.push(Relationship::new(
                parent_id,
                entity_id.clone(),
                RelationshipKind::Contains,
            ));
            stack.push((heading.level, entity_id));
        }

        outcome
    }
}
