use crate::error::{IndexError, Result};
use crate::tokenize::tokenize_code;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// RRF constant `k`; 60 by convention.
pub const DEFAULT_RRF_K: f32 = 60.0;

const VOYAGE_RERANK_URL: &str = "https://api.voyageai.com/v1/rerank";

/// Retrieval settings for the hybrid layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub rrf_k: f32,
    /// Results returned to the caller
    pub top_n: usize,
    /// Candidate pool = top_n * candidate_multiplier per retriever
    pub candidate_multiplier: usize,
    /// Fused results passed to the reranker
    pub rerank_top: usize,
    pub rerank_timeout_secs: u64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            top_n: 10,
            candidate_multiplier: 5,
            rerank_top: 20,
            rerank_timeout_secs: 10,
        }
    }
}

/// A fused retrieval hit. `fused_score` is always the pre-rerank RRF
/// score; `rerank_score` is present only when a reranker ran.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

/// Reciprocal Rank Fusion over any number of ranked lists:
/// `score(d) = Σ 1 / (k + rank_i(d))`, ranks starting at 1.
///
/// Input scores only determine order; absolute values never mix across
/// retrievers. Ties break on chunk id for stable output.
pub fn rrf_fuse(lists: &[Vec<(String, f32)>], k: f32) -> Vec<FusedHit> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for list in lists {
        for (rank, (chunk_id, _)) in list.iter().enumerate() {
            *scores.entry(chunk_id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
        }
    }

    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(chunk_id, fused_score)| FusedHit {
            chunk_id,
            fused_score,
            rerank_score: None,
        })
        .collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

/// Cross-encoder reranking capability: score (query, document) pairs.
/// `Signals` is the local fallback used when no external model is
/// configured.
pub enum Reranker {
    VoyageAi(VoyageReranker),
    Signals,
}

impl Reranker {
    /// Score documents against the query. Returns (document index, score),
    /// best first. Failures and timeouts surface as errors so the caller
    /// can keep the fused order.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<(usize, f32)>> {
        match self {
            Reranker::VoyageAi(voyage) => {
                match tokio::time::timeout(timeout, voyage.rerank(query, documents, top_k)).await {
                    Ok(result) => result,
                    Err(_) => Err(IndexError::DeadlineExceeded(timeout)),
                }
            }
            Reranker::Signals => Ok(signal_rerank(query, documents, top_k)),
        }
    }
}

/// VoyageAI-compatible rerank endpoint client.
pub struct VoyageReranker {
    http: reqwest::Client,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct RerankRequestBody<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponseBody {
    data: Vec<RerankDatum>,
}

#[derive(Deserialize)]
struct RerankDatum {
    index: usize,
    relevance_score: f32,
}

impl VoyageReranker {
    pub fn new(model: impl Into<String>, api_key_env: &str) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| IndexError::MissingCredential(api_key_env.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            model: model.into(),
            api_key,
        })
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>> {
        let body = RerankRequestBody {
            model: &self.model,
            query,
            documents,
            top_k: top_k.min(documents.len()),
        };
        let response = self
            .http
            .post(VOYAGE_RERANK_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(IndexError::RerankFailed(format!(
                "provider returned {status}"
            )));
        }
        let parsed: RerankResponseBody = response.json().await?;
        Ok(parsed
            .data
            .into_iter()
            .map(|d| (d.index, d.relevance_score))
            .collect())
    }
}

/// Local heuristic rerank: exact-phrase containment dominates, token
/// overlap breaks the rest. Deterministic and offline.
fn signal_rerank(query: &str, documents: &[String], top_k: usize) -> Vec<(usize, f32)> {
    let needle = query.to_lowercase();
    let query_tokens: std::collections::HashSet<String> =
        tokenize_code(query).into_iter().collect();

    let mut scored: Vec<(usize, f32)> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let mut score = 0.0f32;
            if !needle.is_empty() && doc.to_lowercase().contains(&needle) {
                score += 1.0;
            }
            if !query_tokens.is_empty() {
                let doc_tokens: std::collections::HashSet<String> =
                    tokenize_code(doc).into_iter().collect();
                let overlap = query_tokens.intersection(&doc_tokens).count() as f32;
                score += overlap / query_tokens.len() as f32;
            }
            (i, score)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored
}
