use crate::config::KnowCodeConfig;
use crate::error::Result;
use crate::paths;
use crate::scanner::FileScanner;
use crate::stats::{AnalyzeStats, IndexStats};
use knowcode_chunker::{content_hash, Chunk, Chunker, ChunkerConfig};
use knowcode_graph::{
    CoverageIngestor, GitHistoryAnalyzer, GraphBuilder, ImpactReport, KnowledgeStore,
    ParseOutcome, TraceDirection, TraceHop,
};
use knowcode_index::{
    tokenize_code, Bm25Index, ChunkStore, EmbeddingClient, IndexManifest, Reranker, VectorIndex,
};
use knowcode_parsers::ParserRegistry;
use knowcode_search::{
    resolve_task_type, ContextBundle, ContextSynthesizer, SearchContext, SearchEngine,
    SearchOptions, TaskType,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

/// Options for an analyze run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Extra ignore patterns layered over the built-in denylist
    pub ignores: Vec<String>,
    /// Ingest git history into commit/author entities
    pub temporal: bool,
    /// Ingest a Cobertura coverage report
    pub coverage: Option<PathBuf>,
}

/// Options for a context query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    pub task_type: TaskType,
    pub max_tokens: usize,
    pub limit_entities: usize,
    pub expand_deps: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            task_type: TaskType::Auto,
            max_tokens: 2000,
            limit_entities: 5,
            expand_deps: true,
        }
    }
}

/// Lightweight entity record for search listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub qualified_name: String,
    pub file: String,
    pub line: usize,
}

#[derive(Clone)]
struct CachedFile {
    source: String,
    hash: String,
    outcome: ParseOutcome,
}

/// The KnowCode engine: analyze a tree into a knowledge graph, index it
/// for hybrid retrieval, and answer context queries.
///
/// Each sub-index (graph, chunk store, lexical, vector) sits behind its
/// own lock; writers swap state at chunk-id granularity so a concurrent
/// query sees either the pre- or post-state of a sub-index, never a mix.
pub struct Engine {
    root: PathBuf,
    config: KnowCodeConfig,
    registry: Mutex<ParserRegistry>,
    chunker: Chunker,
    graph: RwLock<KnowledgeStore>,
    chunks: RwLock<ChunkStore>,
    lexical: RwLock<Bm25Index>,
    vectors: RwLock<Option<VectorIndex>>,
    outcomes: RwLock<HashMap<String, CachedFile>>,
    file_hashes: RwLock<HashMap<String, String>>,
    embedder: Option<EmbeddingClient>,
    reranker: Option<Reranker>,
    search: SearchEngine,
    synthesizer: ContextSynthesizer,
    load_errors: Vec<String>,
}

impl Engine {
    /// Open an engine over a project root, loading any persisted state.
    /// A persisted artifact that fails its schema check disables only the
    /// corresponding subsystem and is recorded in `load_errors`.
    pub async fn open(root: impl AsRef<Path>, config: KnowCodeConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut load_errors = Vec::new();

        let embedder = match config.select_embedding() {
            Some(embedding_config) => match EmbeddingClient::new(embedding_config) {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("Semantic search disabled: {e}");
                    load_errors.push(format!("embedding: {e}"));
                    None
                }
            },
            None => {
                log::info!("No embedding model usable; retrieval is lexical-only");
                None
            }
        };
        let reranker = config.select_reranker();

        // knowledge store
        let knowledge_path = paths::knowledge_path(&root);
        let graph = if knowledge_path.exists() {
            match KnowledgeStore::load(&knowledge_path).await {
                Ok(store) => store,
                Err(e) => {
                    log::error!("Knowledge store unusable, starting empty: {e}");
                    load_errors.push(format!("knowledge: {e}"));
                    KnowledgeStore::new()
                }
            }
        } else {
            KnowledgeStore::new()
        };

        // index artifacts, gated by the manifest
        let (chunks, lexical, vectors) =
            Self::load_index_artifacts(&root, embedder.as_ref(), &mut load_errors).await;

        Ok(Self {
            search: SearchEngine::new(config.hybrid_config()),
            registry: Mutex::new(ParserRegistry::with_default_frontends()?),
            chunker: Chunker::new(ChunkerConfig::default()),
            config,
            root,
            graph: RwLock::new(graph),
            chunks: RwLock::new(chunks),
            lexical: RwLock::new(lexical),
            vectors: RwLock::new(vectors),
            outcomes: RwLock::new(HashMap::new()),
            file_hashes: RwLock::new(HashMap::new()),
            embedder,
            reranker,
            synthesizer: ContextSynthesizer::new(),
            load_errors,
        })
    }

    async fn load_index_artifacts(
        root: &Path,
        embedder: Option<&EmbeddingClient>,
        load_errors: &mut Vec<String>,
    ) -> (ChunkStore, Bm25Index, Option<VectorIndex>) {
        let manifest_path = paths::manifest_path(root);
        if !manifest_path.exists() {
            return (ChunkStore::new(), Bm25Index::new(), None);
        }

        let manifest = match IndexManifest::load(&manifest_path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                log::error!("Index manifest unreadable, index disabled: {e}");
                load_errors.push(format!("manifest: {e}"));
                return (ChunkStore::new(), Bm25Index::new(), None);
            }
        };
        let (model, dimension, provider) = match embedder {
            Some(e) => (e.model_name().to_string(), e.dimension(), e.provider().as_str()),
            None => ("none".to_string(), 0, "none"),
        };
        if let Err(e) = manifest.check_compatible(&model, dimension, provider) {
            log::error!("Index incompatible with configuration, index disabled: {e}");
            load_errors.push(format!("index: {e}"));
            return (ChunkStore::new(), Bm25Index::new(), None);
        }

        let chunks = match ChunkStore::load(&paths::chunks_path(root)).await {
            Ok(store) => store,
            Err(e) => {
                load_errors.push(format!("chunks: {e}"));
                return (ChunkStore::new(), Bm25Index::new(), None);
            }
        };
        let lexical = match Bm25Index::load(&paths::lexical_path(root)).await {
            Ok(index) => index,
            Err(e) => {
                load_errors.push(format!("lexical: {e}"));
                Bm25Index::new()
            }
        };
        let vectors = if paths::vectors_path(root).exists() {
            match VectorIndex::load(&paths::vectors_path(root)).await {
                Ok(mut index) => {
                    let pruned = index.prune(|id| chunks.contains(id));
                    if !pruned.is_empty() {
                        log::warn!("Pruned {} orphaned vectors on load", pruned.len());
                    }
                    Some(index)
                }
                Err(e) => {
                    load_errors.push(format!("vectors: {e}"));
                    None
                }
            }
        } else {
            None
        };
        (chunks, lexical, vectors)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &KnowCodeConfig {
        &self.config
    }

    /// Per-artifact errors recorded while opening persisted state.
    pub fn load_errors(&self) -> &[String] {
        &self.load_errors
    }

    /// Query options seeded from the configured retrieval defaults.
    pub fn default_query_options(&self) -> QueryOptions {
        QueryOptions {
            expand_deps: self.config.retrieval.expand_deps,
            ..QueryOptions::default()
        }
    }

    /// True when the dense index is live (embedder present and loaded).
    pub async fn semantic_enabled(&self) -> bool {
        self.embedder.is_some() && self.vectors.read().await.is_some()
    }

    /// Run a closure against a read snapshot of the knowledge graph.
    pub async fn with_graph<R>(&self, f: impl FnOnce(&KnowledgeStore) -> R) -> R {
        let graph = self.graph.read().await;
        f(&graph)
    }

    pub async fn chunk_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    // ------------------------------------------------------------------
    // analyze

    /// Scan and parse the tree, build the semantic graph, persist it.
    /// Per-file parse errors accumulate in the stats; an unusable root is
    /// the only fatal error.
    pub async fn analyze(&self, options: &AnalyzeOptions) -> Result<AnalyzeStats> {
        let start = Instant::now();
        let mut stats = self.scan_and_parse(options.ignores.clone()).await?;

        let mut builder = GraphBuilder::new();
        {
            let outcomes = self.outcomes.read().await;
            let mut files: Vec<&String> = outcomes.keys().collect();
            files.sort();
            for file in files {
                builder.merge(outcomes[file].outcome.clone());
            }
        }
        if options.temporal {
            builder.merge_pass(GitHistoryAnalyzer::new(&self.root).analyze_history().await);
        }
        if let Some(report) = &options.coverage {
            builder.merge_pass(CoverageIngestor::process_cobertura(report).await);
        }

        let scanned_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .ok();
        let store = builder.build(scanned_at);
        stats.entities = store.entity_count();
        stats.relationships = store.relationship_count();
        stats.errors = store.metadata().errors.clone();

        store.save(&paths::knowledge_path(&self.root)).await?;
        *self.graph.write().await = store;

        stats.time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Analyze finished: {} files, {} entities, {} relationships, {} errors in {}ms",
            stats.files,
            stats.entities,
            stats.relationships,
            stats.errors.len(),
            stats.time_ms
        );
        Ok(stats)
    }

    async fn scan_and_parse(&self, ignores: Vec<String>) -> Result<AnalyzeStats> {
        let scanner = FileScanner::new(&self.root).with_ignores(ignores);
        let files = scanner.scan()?;

        let mut stats = AnalyzeStats::default();
        let mut cache = HashMap::new();
        let mut registry = self.registry.lock().await;
        for file in files {
            stats.add_file(file.language.as_str());
            let (source, outcome) = match tokio::fs::read_to_string(&file.path).await {
                Ok(source) => {
                    let outcome = registry.parse(&file.relative_path, &source);
                    (source, outcome)
                }
                Err(e) => (
                    String::new(),
                    ParseOutcome::failed(&file.relative_path, format!("unreadable: {e}")),
                ),
            };
            cache.insert(
                file.relative_path.clone(),
                CachedFile {
                    hash: content_hash(&source),
                    source,
                    outcome,
                },
            );
        }
        drop(registry);
        *self.outcomes.write().await = cache;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // index

    /// Chunk, embed, and index the parsed tree. Unchanged files (by
    /// content hash) are skipped; per-batch embedding failures isolate the
    /// affected chunks and are reported in the stats.
    pub async fn build_index(&self) -> Result<IndexStats> {
        let start = Instant::now();
        if self.outcomes.read().await.is_empty() {
            self.scan_and_parse(Vec::new()).await?;
        }
        if self.vectors.read().await.is_none() {
            if let Some(embedder) = &self.embedder {
                *self.vectors.write().await = Some(VectorIndex::new(embedder.dimension()));
            }
        }

        let outcomes = self.outcomes.read().await.clone();
        let mut files: Vec<&String> = outcomes.keys().collect();
        files.sort();

        let mut stats = IndexStats::default();
        for file in files {
            let cached = &outcomes[file];
            stats.files += 1;
            let unchanged = self.file_hashes.read().await.get(file.as_str()) == Some(&cached.hash)
                && !self.chunks.read().await.chunk_ids_for_file(file).is_empty();
            if unchanged {
                stats.files_skipped += 1;
                continue;
            }
            let new_chunks = self.chunker.chunk_file(&cached.outcome, &cached.source);
            self.apply_file_chunks(file, new_chunks, &mut stats).await;
            self.file_hashes
                .write()
                .await
                .insert(file.clone(), cached.hash.clone());
        }

        stats.chunks_total = self.chunks.read().await.len();
        self.persist_index().await?;
        stats.time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Index built: {} chunks (+{} -{}), {} embedded, {} skipped files in {}ms",
            stats.chunks_total,
            stats.chunks_added,
            stats.chunks_removed,
            stats.embedded,
            stats.files_skipped,
            stats.time_ms
        );
        Ok(stats)
    }

    /// Apply one file's fresh chunk set to every sub-index, in the order
    /// remove-old then add-new, each swap taken under its own write lock.
    async fn apply_file_chunks(&self, file: &str, new_chunks: Vec<Chunk>, stats: &mut IndexStats) {
        let new_ids: HashSet<&str> = new_chunks.iter().map(|c| c.id.as_str()).collect();

        // stale = previously indexed for this file but absent or changed now
        let (stale, fresh): (Vec<String>, Vec<Chunk>) = {
            let chunks = self.chunks.read().await;
            let stale = chunks
                .chunk_ids_for_file(file)
                .into_iter()
                .filter(|id| !new_ids.contains(id.as_str()))
                .collect();
            let fresh = new_chunks
                .into_iter()
                .filter(|c| {
                    chunks
                        .get(&c.id)
                        .map(|old| old.content_hash != c.content_hash)
                        .unwrap_or(true)
                })
                .collect();
            (stale, fresh)
        };

        // remove-old
        if !stale.is_empty() {
            {
                let mut chunks = self.chunks.write().await;
                for id in &stale {
                    chunks.remove(id);
                }
            }
            {
                let mut lexical = self.lexical.write().await;
                for id in &stale {
                    lexical.remove(id);
                }
            }
            if let Some(vectors) = self.vectors.write().await.as_mut() {
                for id in &stale {
                    vectors.remove(id);
                }
            }
            stats.chunks_removed += stale.len();
        }
        if fresh.is_empty() {
            return;
        }

        // embed before publishing; a failed batch isolates these chunks
        // from the dense index but they remain lexically searchable
        let embeddings = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = fresh.iter().map(|c| c.text.clone()).collect();
                match embedder.embed(&texts).await {
                    Ok(vectors) => Some(vectors),
                    Err(e) => {
                        stats.errors.push(format!("{file}: {e}"));
                        None
                    }
                }
            }
            None => None,
        };

        // add-new
        {
            let mut lexical = self.lexical.write().await;
            for chunk in &fresh {
                lexical.add(&chunk.id, &tokenize_code(&chunk.text));
            }
        }
        if let Some(embeddings) = &embeddings {
            let mut guard = self.vectors.write().await;
            if let Some(vectors) = guard.as_mut() {
                for (chunk, vector) in fresh.iter().zip(embeddings) {
                    if let Err(e) = vectors.add(&chunk.id, vector.clone()) {
                        stats.errors.push(format!("{}: {e}", chunk.id));
                    }
                }
                stats.embedded += embeddings.len();
            }
        }
        {
            let mut chunks = self.chunks.write().await;
            for chunk in fresh {
                stats.chunks_added += 1;
                chunks.insert(chunk);
            }
        }
    }

    async fn persist_index(&self) -> Result<()> {
        let root = &self.root;
        self.chunks.read().await.save(&paths::chunks_path(root)).await?;
        self.lexical.read().await.save(&paths::lexical_path(root)).await?;
        if let Some(vectors) = self.vectors.read().await.as_ref() {
            vectors.save(&paths::vectors_path(root)).await?;
        }

        let source_hash = {
            let hashes = self.file_hashes.read().await;
            let mut pairs: Vec<String> =
                hashes.iter().map(|(f, h)| format!("{f}|{h}")).collect();
            pairs.sort();
            content_hash(&pairs.join("\n"))
        };
        let (model, dimension, provider) = match &self.embedder {
            Some(e) => (e.model_name().to_string(), e.dimension(), e.provider().as_str()),
            None => ("none".to_string(), 0, "none"),
        };
        let manifest = IndexManifest::new(
            model,
            dimension,
            provider,
            self.chunks.read().await.len(),
            source_hash,
        );
        manifest.save(&paths::manifest_path(root)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // incremental updates (watcher)

    /// Re-index a batch of changed paths: reparse (or drop) each file,
    /// rebuild the graph from the per-file cache, and swap the affected
    /// chunks through every sub-index. Paths outside the root or with an
    /// unsupported language are ignored.
    pub async fn reindex_paths(&self, paths_changed: Vec<PathBuf>) -> Result<IndexStats> {
        let start = Instant::now();
        let mut affected: Vec<String> = Vec::new();
        for path in paths_changed {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if relative.starts_with(paths::KNOWCODE_DIR_NAME) {
                continue;
            }
            if knowcode_parsers::Language::from_path(&relative)
                == knowcode_parsers::Language::Unknown
            {
                continue;
            }
            if !affected.contains(&relative) {
                affected.push(relative);
            }
        }
        if affected.is_empty() {
            return Ok(IndexStats::default());
        }
        affected.sort();
        log::info!("Reindexing {} changed file(s)", affected.len());

        let mut stats = IndexStats::default();
        for relative in &affected {
            let absolute = self.root.join(relative);
            stats.files += 1;
            if absolute.exists() {
                let (source, outcome) = match tokio::fs::read_to_string(&absolute).await {
                    Ok(source) => {
                        let mut registry = self.registry.lock().await;
                        let outcome = registry.parse(relative, &source);
                        (source, outcome)
                    }
                    Err(e) => (
                        String::new(),
                        ParseOutcome::failed(relative, format!("unreadable: {e}")),
                    ),
                };
                let hash = content_hash(&source);
                let new_chunks = self.chunker.chunk_file(&outcome, &source);
                self.outcomes.write().await.insert(
                    relative.clone(),
                    CachedFile {
                        source,
                        hash: hash.clone(),
                        outcome,
                    },
                );
                self.file_hashes.write().await.insert(relative.clone(), hash);
                self.apply_file_chunks(relative, new_chunks, &mut stats).await;
            } else {
                // deleted file: drop parse cache and all derived chunks
                self.outcomes.write().await.remove(relative);
                self.file_hashes.write().await.remove(relative);
                self.apply_file_chunks(relative, Vec::new(), &mut stats).await;
            }
        }

        // graph resolution is global, so rebuild from the parse cache
        let mut builder = GraphBuilder::new();
        {
            let outcomes = self.outcomes.read().await;
            let mut files: Vec<&String> = outcomes.keys().collect();
            files.sort();
            for file in files {
                builder.merge(outcomes[file].outcome.clone());
            }
        }
        let scanned_at = self.graph.read().await.metadata().scanned_at.clone();
        let store = builder.build(scanned_at);
        store.save(&paths::knowledge_path(&self.root)).await?;
        *self.graph.write().await = store;

        stats.chunks_total = self.chunks.read().await.len();
        self.persist_index().await?;
        stats.time_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // queries

    /// The primary retrieval entry point: classify, retrieve, expand,
    /// synthesize. See the crate docs for the full pipeline.
    pub async fn retrieve_context_for_query(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<ContextBundle> {
        let task = resolve_task_type(options.task_type, query);
        let search_options = SearchOptions {
            limit_entities: options.limit_entities,
            expand_deps: options.expand_deps,
        };

        let graph = self.graph.read().await;
        let chunks = self.chunks.read().await;
        let lexical = self.lexical.read().await;
        let vectors = self.vectors.read().await;
        let ctx = SearchContext {
            chunks: &chunks,
            lexical: &lexical,
            vectors: vectors.as_ref(),
            graph: &graph,
        };
        let output = self
            .search
            .retrieve(
                query,
                &search_options,
                &ctx,
                self.embedder.as_ref(),
                self.reranker.as_ref(),
            )
            .await?;
        let bundle = self
            .synthesizer
            .synthesize_query(&output, task, options.max_tokens, &graph);
        if bundle.sufficiency_score < self.config.sufficiency_threshold {
            log::debug!(
                "Bundle below sufficiency threshold ({:.2} < {:.2}); caller may need an LLM",
                bundle.sufficiency_score,
                self.config.sufficiency_threshold
            );
        }
        Ok(bundle)
    }

    /// Substring search over entity names.
    pub async fn search_codebase(&self, pattern: &str, limit: usize) -> Vec<EntitySummary> {
        let graph = self.graph.read().await;
        graph
            .search(pattern)
            .into_iter()
            .take(limit)
            .map(|e| EntitySummary {
                id: e.id.clone(),
                kind: e.kind.as_str().to_string(),
                name: e.name.clone(),
                qualified_name: e.qualified_name.clone(),
                file: e.location.file_path.clone(),
                line: e.location.start_line,
            })
            .collect()
    }

    /// Context bundle for a directly addressed entity. `target` is an
    /// entity id, or a pattern resolved through search as a fallback.
    pub async fn get_entity_context(
        &self,
        target: &str,
        max_tokens: usize,
        task_type: TaskType,
    ) -> Result<ContextBundle> {
        let graph = self.graph.read().await;
        let entity_id = if graph.get_entity(target).is_some() {
            target.to_string()
        } else {
            graph
                .search(target)
                .first()
                .map(|e| e.id.clone())
                .unwrap_or_else(|| target.to_string())
        };
        let task = if task_type == TaskType::Auto {
            TaskType::General
        } else {
            task_type
        };
        Ok(self
            .synthesizer
            .synthesize_entity(&entity_id, task, max_tokens, &graph)?)
    }

    /// Multi-hop call-graph traversal.
    pub async fn trace_calls(
        &self,
        entity_id: &str,
        direction: TraceDirection,
        depth: usize,
        max_results: usize,
    ) -> Vec<TraceHop> {
        self.graph
            .read()
            .await
            .trace_calls(entity_id, direction, depth, max_results)
    }

    /// Blast-radius analysis for an entity.
    pub async fn get_impact(&self, entity_id: &str, max_depth: usize) -> ImpactReport {
        self.graph.read().await.get_impact(entity_id, max_depth)
    }
}
