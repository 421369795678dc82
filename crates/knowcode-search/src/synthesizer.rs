use crate::engine::{Evidence, RetrievalMode, RetrievalOutput};
use crate::error::{Result, SearchError};
use crate::task::{section_priorities, Section, TaskType};
use crate::tokens::{estimate_tokens, whole_line_prefix};
use knowcode_graph::{Entity, KnowledgeStore};
use serde::{Deserialize, Serialize};

/// Sufficiency weight: mean normalized retrieval score.
pub const SUFFICIENCY_W_RETRIEVAL: f32 = 0.45;
/// Sufficiency weight: fraction of selected entities backed by evidence.
pub const SUFFICIENCY_W_COVERAGE: f32 = 0.25;
/// Sufficiency weight: fraction of planned content that fit the budget.
pub const SUFFICIENCY_W_BUDGET: f32 = 0.30;
/// Sufficiency weight: penalty per truncated or dropped section.
pub const SUFFICIENCY_W_TRUNCATION: f32 = 0.35;

/// Sections truncated below this size are dropped instead.
pub const MIN_SECTION_TOKENS: usize = 12;

/// Visible elision marker appended to truncated content.
pub const TRUNCATION_MARKER: &str = "… [truncated]";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";
const LIST_LIMIT: usize = 10;

/// The externally visible result of a query: ordered sections rendered to
/// text, token accounting, evidence, and the sufficiency self-estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub context_text: String,
    pub total_tokens: usize,
    /// [0, 1]: can the caller answer from this bundle without an LLM?
    pub sufficiency_score: f32,
    pub task_type: TaskType,
    pub retrieval_mode: RetrievalMode,
    pub evidence: Vec<Evidence>,
    pub selected_entities: Vec<String>,
    pub truncated: bool,
}

/// `clamp(0,1, w1·retrieval + w2·coverage + w3·fill − w4·truncation)`.
/// Exposed for the calibration regression tests.
pub fn sufficiency_score(retrieval: f32, coverage: f32, fill: f32, truncation: f32) -> f32 {
    (SUFFICIENCY_W_RETRIEVAL * retrieval
        + SUFFICIENCY_W_COVERAGE * coverage
        + SUFFICIENCY_W_BUDGET * fill
        - SUFFICIENCY_W_TRUNCATION * truncation)
        .clamp(0.0, 1.0)
}

/// Assembles task-aware, token-budgeted context bundles from the knowledge
/// store and retrieval output.
pub struct ContextSynthesizer {
    min_section_tokens: usize,
}

impl Default for ContextSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSynthesizer {
    pub fn new() -> Self {
        Self {
            min_section_tokens: MIN_SECTION_TOKENS,
        }
    }

    /// Bundle for a retrieval result. An empty result yields a valid
    /// bundle with sufficiency 0.
    pub fn synthesize_query(
        &self,
        output: &RetrievalOutput,
        task: TaskType,
        max_tokens: usize,
        graph: &KnowledgeStore,
    ) -> ContextBundle {
        let selected: Vec<String> = output.ranked.iter().map(|r| r.entity_id.clone()).collect();
        let primary = output
            .ranked
            .iter()
            .find_map(|r| graph.get_entity(&r.entity_id));

        let Some(entity) = primary else {
            return ContextBundle {
                context_text: "No matching context found.".to_string(),
                total_tokens: 0,
                sufficiency_score: 0.0,
                task_type: task,
                retrieval_mode: output.mode,
                evidence: output.evidence.clone(),
                selected_entities: selected,
                truncated: false,
            };
        };

        let coverage = entity_coverage(output);
        self.assemble(
            entity,
            task,
            max_tokens,
            graph,
            output.mode,
            &output.evidence,
            selected,
            output.retrieval_strength,
            coverage,
        )
    }

    /// Bundle for a directly addressed entity (no retrieval step), as used
    /// by `get_entity_context`. Retrieval strength and coverage are 1.0 —
    /// the caller pinpointed the entity.
    pub fn synthesize_entity(
        &self,
        entity_id: &str,
        task: TaskType,
        max_tokens: usize,
        graph: &KnowledgeStore,
    ) -> Result<ContextBundle> {
        let entity = graph
            .get_entity(entity_id)
            .ok_or_else(|| SearchError::EntityNotFound(entity_id.to_string()))?;
        Ok(self.assemble(
            entity,
            task,
            max_tokens,
            graph,
            RetrievalMode::Lexical,
            &[],
            vec![entity_id.to_string()],
            1.0,
            1.0,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        entity: &Entity,
        task: TaskType,
        max_tokens: usize,
        graph: &KnowledgeStore,
        mode: RetrievalMode,
        evidence: &[Evidence],
        selected: Vec<String>,
        retrieval_strength: f32,
        coverage: f32,
    ) -> ContextBundle {
        // plan: header first, then the task's priority order, then evidence
        let mut planned: Vec<(Section, String)> = Vec::new();
        planned.push((Section::Header, render_header(entity)));
        for section in section_priorities(task) {
            if let Some(text) = render_section(*section, entity, graph) {
                planned.push((*section, text));
            }
        }
        if !evidence.is_empty() {
            planned.push((Section::Evidence, render_evidence(evidence)));
        }

        let planned_tokens: usize = planned.iter().map(|(_, t)| estimate_tokens(t)).sum();
        let mut included: Vec<String> = Vec::new();
        let mut total = 0usize;
        let mut degraded = 0usize; // truncated or dropped sections

        for (section, text) in &planned {
            let cost = estimate_tokens(text);
            if total + cost <= max_tokens {
                included.push(text.clone());
                total += cost;
                continue;
            }
            let remaining = max_tokens.saturating_sub(total);
            let marker_cost = estimate_tokens(TRUNCATION_MARKER) + 1;
            if remaining >= self.min_section_tokens + marker_cost {
                if let Some(prefix) = whole_line_prefix(text, remaining - marker_cost) {
                    let clipped = format!("{prefix}\n{TRUNCATION_MARKER}");
                    total += estimate_tokens(&clipped);
                    included.push(clipped);
                    degraded += 1;
                    continue;
                }
            }
            log::debug!(
                "Dropping section {section:?} ({cost} tokens over budget)"
            );
            degraded += 1;
        }

        let truncated = degraded > 0;
        let mut context_text = included.join(SECTION_SEPARATOR);
        if truncated && !context_text.contains(TRUNCATION_MARKER) {
            context_text.push_str("\n\n");
            context_text.push_str(TRUNCATION_MARKER);
        }

        let fill = if planned_tokens == 0 {
            0.0
        } else {
            (total as f32 / planned_tokens as f32).clamp(0.0, 1.0)
        };
        let truncation_penalty = if planned.is_empty() {
            0.0
        } else {
            degraded as f32 / planned.len() as f32
        };

        ContextBundle {
            total_tokens: estimate_tokens(&context_text),
            context_text,
            sufficiency_score: sufficiency_score(
                retrieval_strength,
                coverage,
                fill,
                truncation_penalty,
            ),
            task_type: task,
            retrieval_mode: mode,
            evidence: evidence.to_vec(),
            selected_entities: selected,
            truncated,
        }
    }
}

/// Fraction of retrieved (non-expanded) entities backed by evidence.
fn entity_coverage(output: &RetrievalOutput) -> f32 {
    let retrieved: Vec<&str> = output
        .ranked
        .iter()
        .filter(|r| !r.expanded)
        .map(|r| r.entity_id.as_str())
        .collect();
    if retrieved.is_empty() {
        return 0.0;
    }
    let covered = retrieved
        .iter()
        .filter(|id| {
            output
                .evidence
                .iter()
                .any(|e| e.entity_id.as_deref() == Some(**id))
        })
        .count();
    covered as f32 / retrieved.len() as f32
}

fn render_header(entity: &Entity) -> String {
    let kind = entity.kind.as_str();
    format!(
        "# {}{}: `{}`\n\n**File**: `{}`\n**Lines**: {}-{}",
        kind[..1].to_uppercase(),
        &kind[1..],
        entity.qualified_name,
        entity.location.file_path,
        entity.location.start_line,
        entity.location.end_line
    )
}

fn render_section(section: Section, entity: &Entity, graph: &KnowledgeStore) -> Option<String> {
    match section {
        Section::Header | Section::Evidence => None,
        Section::Signature => entity
            .signature
            .as_ref()
            .map(|sig| format!("## Signature\n\n```\n{sig}\n```")),
        Section::Docstring => entity
            .docstring
            .as_ref()
            .map(|doc| format!("## Description\n\n{doc}")),
        Section::Source => entity
            .source_code
            .as_ref()
            .map(|source| format!("## Source Code\n\n```\n{source}\n```")),
        Section::Callers => render_entity_list("## Called By", graph.get_callers(&entity.id)),
        Section::Callees => render_entity_list("## Calls", graph.get_callees(&entity.id)),
        Section::Inherits => render_entity_list("## Inherits", graph.get_inherits(&entity.id)),
        Section::Imports => {
            let module_id = module_id_of(entity);
            render_entity_list("## Imports", graph.get_imports(&module_id))
        }
        Section::RecentChanges => {
            let module_id = module_id_of(entity);
            let commits = graph.get_recent_changes(&module_id);
            if commits.is_empty() {
                return None;
            }
            let mut lines = vec!["## Recent Changes".to_string(), String::new()];
            for commit in commits.iter().take(LIST_LIMIT) {
                let subject = commit
                    .docstring
                    .as_deref()
                    .and_then(|d| d.lines().next())
                    .unwrap_or("");
                lines.push(format!("- `{}` {subject}", commit.name));
            }
            Some(lines.join("\n"))
        }
        Section::Impact => {
            let impact = graph.get_impact(&entity.id, 3);
            Some(format!(
                "## Impact\n\n{} direct dependents, {} transitive, {} files affected, risk {:.2}",
                impact.direct_dependents.len(),
                impact.transitive_dependents.len(),
                impact.affected_files.len(),
                impact.risk_score
            ))
        }
    }
}

fn render_entity_list(title: &str, entities: Vec<&Entity>) -> Option<String> {
    if entities.is_empty() {
        return None;
    }
    let mut lines = vec![title.to_string(), String::new()];
    for entity in entities.iter().take(LIST_LIMIT) {
        lines.push(format!("- `{}`", entity.qualified_name));
    }
    if entities.len() > LIST_LIMIT {
        lines.push(format!("- ... and {} more", entities.len() - LIST_LIMIT));
    }
    Some(lines.join("\n"))
}

fn render_evidence(evidence: &[Evidence]) -> String {
    let mut lines = vec!["## Evidence".to_string(), String::new()];
    for item in evidence.iter().take(LIST_LIMIT) {
        let score = item.rerank_score.unwrap_or(item.fused_score);
        lines.push(format!(
            "- `{}:{}-{}` (score {score:.3})",
            item.file_path, item.start_line, item.end_line
        ));
    }
    lines.join("\n")
}

fn module_id_of(entity: &Entity) -> String {
    let stem = std::path::Path::new(&entity.location.file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&entity.location.file_path);
    Entity::make_id(&entity.location.file_path, stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RankedEntity;
    use knowcode_graph::{EntityKind, Location, Relationship, RelationshipKind};

    fn graph_with_entity() -> KnowledgeStore {
        let mut graph = KnowledgeStore::new();
        let module = Entity::new(
            EntityKind::Module,
            "auth",
            "auth",
            Location::new("app/auth.py", 1, 40),
        );
        let login = Entity::new(
            EntityKind::Method,
            "login",
            "AuthService.login",
            Location::new("app/auth.py", 10, 24),
        )
        .with_signature("def login(self, username, password)")
        .with_docstring("Validate credentials and issue a session token.")
        .with_source(
            "def login(self, username, password):\n    record = self.store.find(username)\n    if record is None:\n        raise AuthError(username)\n    return self.issue_token(record)",
        );
        let caller = Entity::new(
            EntityKind::Function,
            "handle_login",
            "handle_login",
            Location::new("app/routes.py", 5, 9),
        );
        graph.insert_entity(module);
        graph.insert_entity(login);
        graph.insert_entity(caller);
        graph.insert_relationship(Relationship::new(
            "app/routes.py::handle_login",
            "app/auth.py::AuthService.login",
            RelationshipKind::Calls,
        ));
        graph
    }

    fn retrieval_output(strength: f32) -> RetrievalOutput {
        RetrievalOutput {
            ranked: vec![RankedEntity {
                entity_id: "app/auth.py::AuthService.login".to_string(),
                score: 1.0,
                expanded: false,
            }],
            evidence: vec![Evidence {
                chunk_id: "ck_test".to_string(),
                entity_id: Some("app/auth.py::AuthService.login".to_string()),
                file_path: "app/auth.py".to_string(),
                start_line: 10,
                end_line: 24,
                fused_score: 0.03,
                rerank_score: None,
            }],
            mode: RetrievalMode::Hybrid,
            retrieval_strength: strength,
        }
    }

    #[test]
    fn test_full_bundle_within_budget_scores_high() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let bundle =
            synthesizer.synthesize_query(&retrieval_output(1.0), TaskType::Explain, 2000, &graph);

        assert!(!bundle.truncated);
        assert!(bundle.sufficiency_score >= 0.88, "got {}", bundle.sufficiency_score);
        assert!(bundle.context_text.contains("AuthService.login"));
        assert!(bundle.context_text.contains("## Signature"));
        assert!(bundle.context_text.contains("## Called By"));
        assert!(bundle.total_tokens <= 2000);
    }

    #[test]
    fn test_tiny_budget_keeps_header_and_marks_truncation() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let bundle =
            synthesizer.synthesize_query(&retrieval_output(1.0), TaskType::Explain, 50, &graph);

        assert!(bundle.truncated);
        assert!(bundle.context_text.contains("**File**"));
        assert!(bundle.context_text.contains(TRUNCATION_MARKER));
        assert!(bundle.total_tokens <= 50 + estimate_tokens(TRUNCATION_MARKER) + 2);

        let full =
            synthesizer.synthesize_query(&retrieval_output(1.0), TaskType::Explain, 2000, &graph);
        assert!(bundle.sufficiency_score < full.sufficiency_score);
    }

    #[test]
    fn test_budget_monotonicity() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let mut last_tokens = 0;
        let mut last_score = 0.0f32;
        for budget in [30, 60, 120, 400, 1200, 4000] {
            let bundle = synthesizer.synthesize_query(
                &retrieval_output(0.9),
                TaskType::General,
                budget,
                &graph,
            );
            assert!(bundle.total_tokens >= last_tokens, "tokens shrank at {budget}");
            assert!(
                bundle.sufficiency_score >= last_score - 1e-6,
                "sufficiency shrank at {budget}"
            );
            last_tokens = bundle.total_tokens;
            last_score = bundle.sufficiency_score;
        }
    }

    #[test]
    fn test_empty_retrieval_scores_zero() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let output = RetrievalOutput {
            ranked: vec![],
            evidence: vec![],
            mode: RetrievalMode::Lexical,
            retrieval_strength: 0.0,
        };
        let bundle = synthesizer.synthesize_query(&output, TaskType::General, 1000, &graph);
        assert_eq!(bundle.sufficiency_score, 0.0);
        assert!(bundle.evidence.is_empty());
        assert_eq!(bundle.retrieval_mode, RetrievalMode::Lexical);
    }

    #[test]
    fn test_task_type_changes_section_mix() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let locate =
            synthesizer.synthesize_query(&retrieval_output(1.0), TaskType::Locate, 2000, &graph);
        assert!(!locate.context_text.contains("## Source Code"));
        let debug =
            synthesizer.synthesize_query(&retrieval_output(1.0), TaskType::Debug, 2000, &graph);
        assert!(debug.context_text.contains("## Source Code"));
    }

    #[test]
    fn test_entity_context_without_retrieval() {
        let graph = graph_with_entity();
        let synthesizer = ContextSynthesizer::new();
        let bundle = synthesizer
            .synthesize_entity(
                "app/auth.py::AuthService.login",
                TaskType::Explain,
                2000,
                &graph,
            )
            .unwrap();
        assert!(bundle.sufficiency_score >= 0.88);
        assert!(synthesizer
            .synthesize_entity("missing", TaskType::Explain, 2000, &graph)
            .is_err());
    }

    // calibration regression set: (retrieval, coverage, fill, truncation) -> band
    #[test]
    fn test_sufficiency_calibration_bands() {
        // one entity fully in budget
        assert!(sufficiency_score(1.0, 1.0, 1.0, 0.0) >= 0.88);
        assert!(sufficiency_score(0.8, 1.0, 1.0, 0.0) >= 0.88);
        // weak retrieval, heavy truncation
        assert!(sufficiency_score(0.2, 0.5, 0.4, 0.8) < 0.5);
        assert!(sufficiency_score(0.1, 0.2, 0.2, 0.9) < 0.2);
        // nothing retrieved
        assert_eq!(sufficiency_score(0.0, 0.0, 0.0, 0.0), 0.0);
        // clamped to [0, 1]
        assert!(sufficiency_score(1.0, 1.0, 1.0, 1.0) >= 0.0);
        assert!(sufficiency_score(2.0, 2.0, 2.0, 0.0) <= 1.0);
    }
}
