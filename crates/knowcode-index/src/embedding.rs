use crate::error::{IndexError, Result};
use crate::tokenize::tokenize_code;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Embedding provider family. Stub is a deterministic offline projection
/// used by tests and air-gapped installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    #[serde(alias = "voyage")]
    VoyageAi,
    Stub,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::VoyageAi => "voyageai",
            ProviderKind::Stub => "stub",
        }
    }
}

/// Configuration for one embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    /// Environment variable holding the credential
    pub api_key_env: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Provider-side rate limit honored through a token bucket
    pub requests_per_minute: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model_name: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: 1536,
            batch_size: 100,
            timeout_secs: 30,
            max_retries: 3,
            requests_per_minute: 60,
        }
    }
}

impl EmbeddingConfig {
    /// Deterministic offline provider; no credential needed.
    pub fn stub(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Stub,
            model_name: "stub".to_string(),
            api_key_env: String::new(),
            dimension,
            batch_size: 64,
            timeout_secs: 5,
            max_retries: 1,
            requests_per_minute: 100_000,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequestBody<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponseBody {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket enforcing the provider's request-per-minute limit.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Batch embedding client over a pluggable provider.
///
/// Batches are retried with jittered exponential backoff; a permanent
/// failure surfaces as `EmbeddingFailed` without corrupting any index.
#[derive(Debug)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    api_key: Option<String>,
    http: reqwest::Client,
    bucket: TokenBucket,
}

impl EmbeddingClient {
    /// Build a client. Non-stub providers require the credential named by
    /// `api_key_env`; a missing credential is an error the caller degrades
    /// on (semantic retrieval off, lexical retrieval stays up).
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let api_key = match config.provider {
            ProviderKind::Stub => None,
            _ => Some(
                std::env::var(&config.api_key_env)
                    .map_err(|_| IndexError::MissingCredential(config.api_key_env.clone()))?,
            ),
        };
        let bucket = TokenBucket::new(config.requests_per_minute);
        Ok(Self {
            config,
            api_key,
            http: reqwest::Client::new(),
            bucket,
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    pub fn provider(&self) -> ProviderKind {
        self.config.provider
    }

    /// Embed a batch of document texts, splitting into provider-sized
    /// sub-batches. Output order matches input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            out.extend(self.embed_batch(batch, "document").await?);
        }
        Ok(out)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch, "query").await?;
        vectors
            .pop()
            .ok_or_else(|| IndexError::EmbeddingFailed("provider returned no vector".into()))
    }

    async fn embed_batch(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.config.provider == ProviderKind::Stub {
            return Ok(texts
                .iter()
                .map(|t| stub_embedding(t, self.config.dimension))
                .collect());
        }

        let mut attempt = 0;
        loop {
            self.bucket.acquire().await;
            let deadline = Duration::from_secs(self.config.timeout_secs);
            let result = tokio::time::timeout(deadline, self.request(texts, input_type)).await;

            let error = match result {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => e,
                Err(_) => IndexError::DeadlineExceeded(deadline),
            };

            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(IndexError::EmbeddingFailed(format!(
                    "batch of {} texts failed after {attempt} attempts: {error}",
                    texts.len()
                )));
            }
            let backoff = backoff_with_jitter(attempt);
            log::warn!(
                "Embedding attempt {attempt} failed ({error}); retrying in {backoff:?}"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn request(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        let (url, input_type) = match self.config.provider {
            ProviderKind::OpenAi => (format!("{OPENAI_BASE_URL}/embeddings"), None),
            ProviderKind::VoyageAi => {
                (format!("{VOYAGE_BASE_URL}/embeddings"), Some(input_type))
            }
            ProviderKind::Stub => unreachable!("stub handled before request"),
        };
        let body = EmbedRequestBody {
            model: &self.config.model_name,
            input: texts,
            input_type,
        };
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(IndexError::EmbeddingFailed(format!(
                "provider returned {status}: {detail}"
            )));
        }

        let parsed: EmbedResponseBody = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(IndexError::EmbeddingFailed(format!(
                "provider returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        let expected = self.config.dimension;
        let mut vectors = Vec::with_capacity(parsed.data.len());
        for datum in parsed.data {
            if datum.embedding.len() != expected {
                return Err(IndexError::InvalidDimension {
                    expected,
                    actual: datum.embedding.len(),
                });
            }
            vectors.push(normalize(datum.embedding));
        }
        Ok(vectors)
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = Duration::from_millis(500 * 2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    base + jitter
}

/// Normalize to unit length so inner product equals cosine similarity.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Deterministic bag-of-tokens projection. Similar texts share tokens and
/// therefore land near each other, which is enough for offline retrieval
/// and for exercising the dense path in tests.
pub fn stub_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for token in tokenize_code(text) {
        let digest = Sha256::digest(token.as_bytes());
        let hash = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0; 8]));
        let index = (hash % vector.len() as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
    normalize(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_stub_embedding_is_deterministic() {
        let a = stub_embedding("fn parse_config() {}", 256);
        let b = stub_embedding("fn parse_config() {}", 256);
        assert_eq!(a, b);
    }

    #[test]
    fn test_stub_embedding_similarity_orders_sensibly() {
        let doc = stub_embedding("def login(self, username): validate credentials", 256);
        let close = stub_embedding("how does login validate credentials", 256);
        let far = stub_embedding("matrix multiplication kernel on gpu", 256);
        assert!(cosine(&doc, &close) > cosine(&doc, &far));
    }

    #[test]
    fn test_stub_embedding_is_unit_length() {
        let v = stub_embedding("some text with tokens", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_credential_is_explicit_error() {
        let config = EmbeddingConfig {
            api_key_env: "KNOWCODE_TEST_NO_SUCH_KEY".to_string(),
            ..Default::default()
        };
        match EmbeddingClient::new(config) {
            Err(IndexError::MissingCredential(var)) => {
                assert_eq!(var, "KNOWCODE_TEST_NO_SUCH_KEY");
            }
            other => panic!("expected MissingCredential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stub_client_embeds_batches_in_order() {
        let client = EmbeddingClient::new(EmbeddingConfig::stub(64)).unwrap();
        let texts: Vec<String> = (0..150).map(|i| format!("token_{i} body")).collect();
        let vectors = client.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 150);
        assert_eq!(vectors[7], stub_embedding("token_7 body", 64));
    }

    #[test]
    fn test_backoff_grows() {
        let first = backoff_with_jitter(1);
        let third = backoff_with_jitter(3);
        assert!(third > first);
        assert!(first >= Duration::from_millis(500));
    }
}
