use crate::error::{Result, SearchError};
use knowcode_graph::{EntityKind, KnowledgeStore};
use knowcode_index::{
    rrf_fuse, tokenize_code, Bm25Index, ChunkStore, EmbeddingClient, HybridConfig, Reranker,
    VectorIndex,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How the final ranking was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Hybrid,
    Lexical,
    Semantic,
}

impl RetrievalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMode::Hybrid => "hybrid",
            RetrievalMode::Lexical => "lexical",
            RetrievalMode::Semantic => "semantic",
        }
    }
}

/// One piece of chunk evidence backing the ranked entities. Both the
/// pre-rerank (fused) and post-rerank scores are kept for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub chunk_id: String,
    pub entity_id: Option<String>,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub fused_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// A scored entity in the result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity_id: String,
    pub score: f32,
    /// True when admitted by dependency expansion rather than retrieval
    pub expanded: bool,
}

/// Output of the retrieval pipeline, before context synthesis.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub ranked: Vec<RankedEntity>,
    pub evidence: Vec<Evidence>,
    pub mode: RetrievalMode,
    /// Mean normalized relevance of the evidence, in [0, 1]
    pub retrieval_strength: f32,
}

/// Retrieval options supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit_entities: usize,
    pub expand_deps: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit_entities: 5,
            expand_deps: true,
        }
    }
}

/// Read-only view over the sub-indexes a query consults. Each field is a
/// snapshot guarded by its own lock at the call site, so queries never
/// observe a torn state within one sub-index.
pub struct SearchContext<'a> {
    pub chunks: &'a ChunkStore,
    pub lexical: &'a Bm25Index,
    pub vectors: Option<&'a VectorIndex>,
    pub graph: &'a KnowledgeStore,
}

/// Weight applied to dependency-expansion entities relative to the entity
/// that pulled them in.
pub const EXPANSION_WEIGHT: f32 = 0.3;

/// Dense hits below this cosine similarity are noise, not matches.
/// Without the floor, an exhaustive vector search would hand every query
/// a full candidate list and inflate sufficiency for unmatched queries.
pub const MIN_DENSE_SCORE: f32 = 0.05;

/// The retrieval pipeline: hybrid retrieve, map chunks to anchor entities,
/// score entities, optionally expand one hop through the call graph.
pub struct SearchEngine {
    config: HybridConfig,
}

impl SearchEngine {
    pub fn new(config: HybridConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(HybridConfig::default())
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Run the full pipeline for a natural-language query.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &SearchOptions,
        ctx: &SearchContext<'_>,
        embedder: Option<&EmbeddingClient>,
        reranker: Option<&Reranker>,
    ) -> Result<RetrievalOutput> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let pool = self.config.top_n * self.config.candidate_multiplier.max(1);

        // 1. sparse retrieval
        let query_tokens = tokenize_code(query);
        let lexical_hits = ctx.lexical.search(&query_tokens, pool);

        // 2. dense retrieval; embedding failure degrades to lexical-only
        let dense_hits = match (embedder, ctx.vectors) {
            (Some(embedder), Some(vectors)) => match embedder.embed_query(query).await {
                Ok(vector) => {
                    let hits: Vec<(String, f32)> = vectors
                        .search(&vector, pool)?
                        .into_iter()
                        .filter(|(_, score)| *score > MIN_DENSE_SCORE)
                        .collect();
                    Some(hits)
                }
                Err(e) => {
                    log::warn!("Semantic retrieval unavailable: {e}");
                    None
                }
            },
            _ => None,
        };

        let mode = match &dense_hits {
            Some(_) if !lexical_hits.is_empty() || !ctx.lexical.is_empty() => RetrievalMode::Hybrid,
            Some(_) => RetrievalMode::Semantic,
            None => RetrievalMode::Lexical,
        };

        // 3. reciprocal rank fusion
        let mut lists = vec![lexical_hits];
        let list_count = 1 + usize::from(dense_hits.is_some());
        if let Some(dense) = dense_hits {
            lists.push(dense);
        }
        let mut fused = rrf_fuse(&lists, self.config.rrf_k);
        fused.truncate(pool);

        // 4. optional rerank of the head; failure keeps the fused order
        if let Some(reranker) = reranker {
            let head = fused.len().min(self.config.rerank_top);
            if head > 0 {
                let documents: Vec<String> = fused[..head]
                    .iter()
                    .map(|hit| {
                        ctx.chunks
                            .get(&hit.chunk_id)
                            .map(|c| c.text.clone())
                            .unwrap_or_default()
                    })
                    .collect();
                let timeout = Duration::from_secs(self.config.rerank_timeout_secs);
                match reranker.rerank(query, &documents, head, timeout).await {
                    Ok(scored) => {
                        let mut reordered = Vec::with_capacity(fused.len());
                        for (index, score) in &scored {
                            if let Some(hit) = fused.get(*index) {
                                let mut hit = hit.clone();
                                hit.rerank_score = Some(*score);
                                reordered.push(hit);
                            }
                        }
                        let reranked_ids: std::collections::HashSet<String> =
                            reordered.iter().map(|h| h.chunk_id.clone()).collect();
                        for hit in &fused {
                            if !reranked_ids.contains(&hit.chunk_id) {
                                reordered.push(hit.clone());
                            }
                        }
                        fused = reordered;
                    }
                    Err(e) => {
                        log::warn!("Rerank unavailable, keeping fused order: {e}");
                    }
                }
            }
        }

        // 5. evidence from the head of the ranking
        let evidence: Vec<Evidence> = fused
            .iter()
            .take(self.config.top_n)
            .filter_map(|hit| {
                let chunk = ctx.chunks.get(&hit.chunk_id)?;
                Some(Evidence {
                    chunk_id: hit.chunk_id.clone(),
                    entity_id: chunk.entity_id.clone(),
                    file_path: chunk.file_path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    fused_score: hit.fused_score,
                    rerank_score: hit.rerank_score,
                })
            })
            .collect();

        let retrieval_strength = mean_strength(&evidence, self.config.rrf_k, list_count);

        // 6. chunk -> anchor entity, summed contributions
        let module_by_file: HashMap<&str, &str> = ctx
            .graph
            .entities()
            .filter(|e| e.kind == EntityKind::Module)
            .map(|e| (e.location.file_path.as_str(), e.id.as_str()))
            .collect();

        let mut entity_scores: HashMap<String, f32> = HashMap::new();
        for item in &evidence {
            let anchor = item
                .entity_id
                .as_deref()
                .filter(|id| ctx.graph.get_entity(id).is_some())
                .or_else(|| module_by_file.get(item.file_path.as_str()).copied());
            let Some(anchor) = anchor else {
                continue;
            };
            let contribution = item
                .rerank_score
                .unwrap_or_else(|| normalized_rrf(item.fused_score, self.config.rrf_k, list_count));
            *entity_scores.entry(anchor.to_string()).or_insert(0.0) += contribution;
        }

        let mut ranked: Vec<RankedEntity> = entity_scores
            .into_iter()
            .map(|(entity_id, score)| RankedEntity {
                entity_id,
                score,
                expanded: false,
            })
            .collect();
        ranked.sort_by(|a, b| {
            let tie = |entity: &RankedEntity| {
                let e = ctx.graph.get_entity(&entity.entity_id);
                (
                    e.map(|e| e.kind.retrieval_rank()).unwrap_or(0),
                    std::cmp::Reverse(
                        e.map(|e| e.qualified_name.len()).unwrap_or(usize::MAX),
                    ),
                )
            };
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie(b).cmp(&tie(a)))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        ranked.truncate(options.limit_entities);

        // 7. one hop of callers/callees at reduced weight
        if options.expand_deps {
            let selected: Vec<(String, f32)> = ranked
                .iter()
                .map(|r| (r.entity_id.clone(), r.score))
                .collect();
            let mut present: std::collections::HashSet<String> =
                ranked.iter().map(|r| r.entity_id.clone()).collect();
            let mut expansions = Vec::new();
            for (entity_id, score) in &selected {
                for neighbor in ctx
                    .graph
                    .get_callers(entity_id)
                    .into_iter()
                    .chain(ctx.graph.get_callees(entity_id))
                {
                    if present.insert(neighbor.id.clone()) {
                        expansions.push(RankedEntity {
                            entity_id: neighbor.id.clone(),
                            score: score * EXPANSION_WEIGHT,
                            expanded: true,
                        });
                    }
                }
            }
            expansions.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.entity_id.cmp(&b.entity_id))
            });
            ranked.extend(expansions);
        }

        log::debug!(
            "Query '{query}': {} evidence, {} entities, mode={}",
            evidence.len(),
            ranked.len(),
            mode.as_str()
        );
        Ok(RetrievalOutput {
            ranked,
            evidence,
            mode,
            retrieval_strength,
        })
    }
}

/// Map an RRF score into [0, 1]: 1.0 means first rank in every list.
fn normalized_rrf(fused: f32, rrf_k: f32, list_count: usize) -> f32 {
    let best = list_count.max(1) as f32 / (rrf_k + 1.0);
    (fused / best).clamp(0.0, 1.0)
}

fn mean_strength(evidence: &[Evidence], rrf_k: f32, list_count: usize) -> f32 {
    if evidence.is_empty() {
        return 0.0;
    }
    let sum: f32 = evidence
        .iter()
        .map(|e| {
            let fused = normalized_rrf(e.fused_score, rrf_k, list_count);
            match e.rerank_score {
                Some(rerank) => fused.max(rerank.clamp(0.0, 1.0)),
                None => fused,
            }
        })
        .sum();
    sum / evidence.len() as f32
}
