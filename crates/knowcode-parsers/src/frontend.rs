use crate::error::Result;
use crate::language::Language;
use crate::{JavaFrontend, JsFrontend, MarkdownFrontend, PythonFrontend, YamlFrontend};
use knowcode_graph::{Entity, EntityKind, Location, ParseOutcome};
use std::collections::HashMap;
use std::path::Path;

/// Capability interface for a per-language parser frontend.
///
/// A frontend turns one file into entities plus local relations. Targets it
/// cannot resolve within the file are emitted symbolically (`ref::Name`);
/// cross-file resolution belongs to the graph builder. Frontends must not
/// drop unparseable input silently: a failed parse yields a `parse_error`
/// entity via [`ParseOutcome::failed`].
pub trait ParserFrontend: Send {
    fn language(&self) -> Language;

    /// Parse one file. `file_path` is the root-relative path used for ids;
    /// `source` is the file content.
    fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome;
}

/// Registry dispatching files to frontends by language.
pub struct ParserRegistry {
    frontends: HashMap<Language, Box<dyn ParserFrontend>>,
}

impl ParserRegistry {
    /// Registry with every built-in frontend.
    pub fn with_default_frontends() -> Result<Self> {
        let mut registry = Self {
            frontends: HashMap::new(),
        };
        registry.register(Box::new(PythonFrontend::new()?));
        registry.register(Box::new(JsFrontend::javascript()?));
        registry.register(Box::new(JsFrontend::typescript()?));
        registry.register(Box::new(JavaFrontend::new()?));
        registry.register(Box::new(MarkdownFrontend::new()));
        registry.register(Box::new(YamlFrontend::new()));
        Ok(registry)
    }

    pub fn register(&mut self, frontend: Box<dyn ParserFrontend>) {
        self.frontends.insert(frontend.language(), frontend);
    }

    pub fn supports(&self, language: Language) -> bool {
        self.frontends.contains_key(&language)
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        self.frontends.keys().copied().collect()
    }

    /// Parse a file with the frontend registered for its language.
    /// Unsupported languages degrade to an error outcome.
    pub fn parse(&mut self, file_path: &str, source: &str) -> ParseOutcome {
        let language = Language::from_path(file_path);
        match self.frontends.get_mut(&language) {
            Some(frontend) => frontend.parse(file_path, source),
            None => {
                log::debug!("No frontend for {file_path} ({})", language.as_str());
                ParseOutcome {
                    file_path: file_path.to_string(),
                    errors: vec![format!("unsupported file type: {}", language.as_str())],
                    ..Default::default()
                }
            }
        }
    }
}

/// Create the module entity every frontend emits for its file.
pub(crate) fn module_entity(file_path: &str, source: &str, language: Language) -> Entity {
    let stem = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path);
    let line_count = source.lines().count().max(1);
    let mut entity = Entity::new(
        EntityKind::Module,
        stem,
        stem,
        Location::new(file_path, 1, line_count),
    );
    entity
        .attrs
        .insert("language".into(), language.as_str().into());
    entity
}

/// Slice the lines [start_line, end_line] (1-based, inclusive) of `source`.
pub(crate) fn source_slice(source: &str, start_line: usize, end_line: usize) -> String {
    source
        .lines()
        .skip(start_line.saturating_sub(1))
        .take(end_line.saturating_sub(start_line) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatches_by_extension() {
        let mut registry = ParserRegistry::with_default_frontends().unwrap();
        let outcome = registry.parse("pkg/mod.py", "def f():\n    pass\n");
        assert!(outcome.errors.is_empty());
        assert!(outcome.entities.iter().any(|e| e.qualified_name == "f"));
    }

    #[test]
    fn test_registry_unsupported_language() {
        let mut registry = ParserRegistry::with_default_frontends().unwrap();
        let outcome = registry.parse("binary.exe", "");
        assert!(outcome.entities.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_source_slice_is_inclusive() {
        let src = "a\nb\nc\nd\n";
        assert_eq!(source_slice(src, 2, 3), "b\nc");
        assert_eq!(source_slice(src, 1, 1), "a");
    }
}
