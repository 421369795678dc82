use crate::config::ChunkerConfig;
use crate::types::{Chunk, ChunkKind};
use knowcode_graph::{Entity, EntityKind, ParseOutcome};

/// Turns a parsed file into retrieval chunks.
///
/// Three chunk kinds are emitted per file: one module header, one imports
/// block, and one chunk per entity. Functions and methods always get their
/// own chunks. A class whose source fits `max_entity_bytes` additionally
/// keeps a whole-class chunk (methods included); an oversize class keeps
/// only a slim header chunk and the method chunks carry the bodies.
///
/// Chunks are collected into a file-scoped buffer and returned in one
/// piece, so a partial downstream failure never observes half a file.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// Chunk one file from its parse outcome and raw source.
    pub fn chunk_file(&self, outcome: &ParseOutcome, source: &str) -> Vec<Chunk> {
        let mut buffer = Vec::new();
        let file_path = outcome.file_path.as_str();
        let module = outcome
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Module);

        self.emit_module_header(&mut buffer, file_path, source, module);
        self.emit_imports(&mut buffer, file_path, source);

        for entity in &outcome.entities {
            match entity.kind {
                EntityKind::Function | EntityKind::Method => {
                    self.emit_entity(&mut buffer, entity);
                }
                EntityKind::Class => {
                    let source_len = entity.source_code.as_deref().map_or(0, str::len);
                    if source_len <= self.config.max_entity_bytes {
                        // small class: one chunk carrying the whole body,
                        // methods included
                        self.emit_entity(&mut buffer, entity);
                    } else {
                        self.emit_class_header(&mut buffer, entity);
                    }
                }
                _ => {}
            }
        }

        log::debug!("Chunked {file_path}: {} chunks", buffer.len());
        buffer
    }

    fn emit_module_header(
        &self,
        buffer: &mut Vec<Chunk>,
        file_path: &str,
        source: &str,
        module: Option<&Entity>,
    ) {
        let (header_lines, span_end) = leading_header(source);
        let mut body = header_lines.join("\n");
        if body.trim().is_empty() {
            if let Some(doc) = module.and_then(|m| m.docstring.as_deref()) {
                body = doc.to_string();
            }
        }
        if body.trim().is_empty() {
            return;
        }

        let text = self.with_preamble(file_path, None, "module_header", &body);
        buffer.push(Chunk::new(
            ChunkKind::ModuleHeader,
            module.map(|m| m.id.clone()),
            file_path,
            1,
            span_end.max(1),
            text,
            "module_header",
        ));
    }

    fn emit_imports(&self, buffer: &mut Vec<Chunk>, file_path: &str, source: &str) {
        let mut first = None;
        let mut last = 0;
        let mut lines = Vec::new();
        for (i, line) in source.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
                first.get_or_insert(i + 1);
                last = i + 1;
                lines.push(line);
            }
        }
        let Some(start) = first else {
            return;
        };

        let text = self.with_preamble(file_path, None, "imports", &lines.join("\n"));
        buffer.push(Chunk::new(
            ChunkKind::Imports,
            None,
            file_path,
            start,
            last,
            text,
            "imports",
        ));
    }

    fn emit_entity(&self, buffer: &mut Vec<Chunk>, entity: &Entity) {
        let mut body = String::new();
        if let Some(signature) = &entity.signature {
            body.push_str(signature);
            body.push('\n');
        }
        if self.config.include_docstrings {
            if let Some(doc) = &entity.docstring {
                body.push_str(doc);
                body.push('\n');
            }
        }
        match &entity.source_code {
            Some(source) => body.push_str(source),
            None => body.push_str(&entity.qualified_name),
        }

        let text = self.with_preamble(
            &entity.location.file_path,
            Some(entity),
            entity.kind.as_str(),
            &body,
        );
        buffer.push(Chunk::new(
            ChunkKind::Entity,
            Some(entity.id.clone()),
            &entity.location.file_path,
            entity.location.start_line,
            entity.location.end_line,
            text,
            &entity.qualified_name,
        ));
    }

    /// Oversize class: a slim header chunk only; the method chunks carry
    /// the bodies.
    fn emit_class_header(&self, buffer: &mut Vec<Chunk>, class: &Entity) {
        let mut header = String::new();
        if let Some(first_line) = class.source_code.as_deref().and_then(|s| s.lines().next()) {
            header.push_str(first_line);
            header.push('\n');
        }
        if let Some(doc) = &class.docstring {
            header.push_str(doc);
            header.push('\n');
        }
        if header.trim().is_empty() {
            header = class.qualified_name.clone();
        }

        let text = self.with_preamble(&class.location.file_path, Some(class), "class", &header);
        buffer.push(Chunk::new(
            ChunkKind::Entity,
            Some(class.id.clone()),
            &class.location.file_path,
            class.location.start_line,
            class.location.start_line,
            text,
            &class.qualified_name,
        ));
    }

    /// Leading comment block naming file, entity, and kind. Boosts recall
    /// for symbol- and path-shaped queries in both indexes.
    fn with_preamble(
        &self,
        file_path: &str,
        entity: Option<&Entity>,
        kind: &str,
        body: &str,
    ) -> String {
        if !self.config.embed_metadata {
            return body.to_string();
        }
        let mut text = format!("# file: {file_path}\n");
        match entity {
            Some(e) => text.push_str(&format!("# entity: {} ({kind})\n", e.qualified_name)),
            None => text.push_str(&format!("# section: {kind}\n")),
        }
        text.push_str(body);
        text
    }
}

/// Leading lines of a file up to the first definition: comments, blank
/// lines, and a module docstring. Returns the lines and the 1-based line
/// number where the block ends.
fn leading_header(source: &str) -> (Vec<&str>, usize) {
    let mut lines = Vec::new();
    let mut in_docstring = false;
    let mut quote = "";
    let mut end = 0;

    for (i, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if in_docstring {
            lines.push(line);
            end = i + 1;
            if trimmed.contains(quote) {
                break;
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''") {
            quote = if trimmed.starts_with("\"\"\"") { "\"\"\"" } else { "'''" };
            lines.push(line);
            end = i + 1;
            if trimmed.len() >= 2 * quote.len() && trimmed[quote.len()..].contains(quote) {
                break;
            }
            in_docstring = true;
            continue;
        }
        if trimmed.starts_with('#') || trimmed.starts_with("//") || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
        {
            lines.push(line);
            end = i + 1;
            continue;
        }
        break;
    }
    (lines, end)
}
