//! End-to-end query flow: hybrid retrieval, context bundles, budget
//! behavior, and manifest guarding.

use knowcode_indexer::{
    manifest_path, AnalyzeOptions, Engine, KnowCodeConfig, QueryOptions, TaskType,
};
use std::path::Path;

const DIM: usize = 128;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

const MODULE_M: &str = r#""""Module M."""


class C:
    """A class."""

    def f(self):
        """Do the thing."""
        return 1
"#;

const MODULE_G: &str = r#"from m import C


def g():
    c = C()
    return c.f()
"#;

async fn indexed_engine(root: &Path) -> Engine {
    let engine = Engine::open(root, KnowCodeConfig::offline(DIM)).await.unwrap();
    engine.analyze(&AnalyzeOptions::default()).await.unwrap();
    engine.build_index().await.unwrap();
    engine
}

#[tokio::test]
async fn test_query_finds_method_through_hybrid_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);
    write(dir.path(), "g.py", MODULE_G);

    let engine = indexed_engine(dir.path()).await;
    assert!(engine.semantic_enabled().await);

    let bundle = engine
        .retrieve_context_for_query("how does f work", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(bundle.retrieval_mode.as_str(), "hybrid");
    assert!(bundle
        .evidence
        .iter()
        .any(|e| e.entity_id.as_deref() == Some("m.py::C.f")));
    assert_eq!(bundle.selected_entities[0], "m.py::C.f");
    assert!(
        bundle.sufficiency_score >= 0.7,
        "sufficiency {} below band",
        bundle.sufficiency_score
    );
    assert!(bundle.context_text.contains("C.f"));
}

#[tokio::test]
async fn test_tiny_budget_truncates_with_marker() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);
    write(dir.path(), "g.py", MODULE_G);

    let engine = indexed_engine(dir.path()).await;
    let full = engine
        .retrieve_context_for_query("how does f work", &QueryOptions::default())
        .await
        .unwrap();
    let tiny = engine
        .retrieve_context_for_query(
            "how does f work",
            &QueryOptions {
                max_tokens: 50,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(tiny.truncated);
    assert!(tiny.context_text.contains(knowcode_search::TRUNCATION_MARKER));
    assert!(tiny.context_text.contains("**File**"), "header survives");
    assert!(tiny.sufficiency_score < full.sufficiency_score);
    assert!(tiny.total_tokens <= full.total_tokens);
}

#[tokio::test]
async fn test_budget_monotonicity_at_engine_level() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);

    let engine = indexed_engine(dir.path()).await;
    let mut last_tokens = 0;
    let mut last_score = 0.0f32;
    for max_tokens in [40, 100, 400, 2000] {
        let bundle = engine
            .retrieve_context_for_query(
                "how does f work",
                &QueryOptions {
                    max_tokens,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(bundle.total_tokens >= last_tokens);
        assert!(bundle.sufficiency_score >= last_score - 1e-6);
        last_tokens = bundle.total_tokens;
        last_score = bundle.sufficiency_score;
    }
}

#[tokio::test]
async fn test_unmatched_query_has_low_sufficiency() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);

    let engine = indexed_engine(dir.path()).await;
    let bundle = engine
        .retrieve_context_for_query("zzqx unmatched nonsense", &QueryOptions::default())
        .await
        .unwrap();
    assert!(bundle.sufficiency_score < 0.5);
}

#[tokio::test]
async fn test_expand_deps_superset_at_engine_level() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);
    write(dir.path(), "g.py", MODULE_G);

    let engine = indexed_engine(dir.path()).await;
    let narrow = engine
        .retrieve_context_for_query(
            "how does f work",
            &QueryOptions {
                expand_deps: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let expanded = engine
        .retrieve_context_for_query("how does f work", &QueryOptions::default())
        .await
        .unwrap();

    for id in &narrow.selected_entities {
        assert!(expanded.selected_entities.contains(id));
    }
    assert!(expanded.selected_entities.contains(&"g.py::g".to_string()));
}

#[tokio::test]
async fn test_search_codebase_and_entity_context() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);

    let engine = indexed_engine(dir.path()).await;
    let found = engine.search_codebase("f", 10).await;
    assert!(found.iter().any(|e| e.id == "m.py::C.f"));

    let bundle = engine
        .get_entity_context("m.py::C.f", 2000, TaskType::Explain)
        .await
        .unwrap();
    assert!(bundle.context_text.contains("Do the thing."));
    assert!(bundle.sufficiency_score >= 0.88);

    // pattern fallback resolves through search
    let by_name = engine
        .get_entity_context("C.f", 2000, TaskType::General)
        .await
        .unwrap();
    assert_eq!(by_name.selected_entities, vec!["m.py::C.f".to_string()]);
}

#[tokio::test]
async fn test_corrupt_manifest_disables_index_not_analyze() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);

    {
        let engine = indexed_engine(dir.path()).await;
        assert!(engine.chunk_count().await > 0);
    }

    // corrupt the manifest dimension (D+1)
    let manifest = manifest_path(dir.path());
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest).unwrap()).unwrap();
    doc["dimension"] = serde_json::json!(DIM + 1);
    std::fs::write(&manifest, doc.to_string()).unwrap();

    let engine = Engine::open(dir.path(), KnowCodeConfig::offline(DIM)).await.unwrap();
    assert!(engine
        .load_errors()
        .iter()
        .any(|e| e.contains("dimension")));
    assert_eq!(engine.chunk_count().await, 0, "index subsystem disabled");

    // analyze is unaffected by the index failure
    let stats = engine.analyze(&AnalyzeOptions::default()).await.unwrap();
    assert!(stats.entities >= 3);
}

#[tokio::test]
async fn test_index_reload_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.py", MODULE_M);

    let before = {
        let engine = indexed_engine(dir.path()).await;
        engine
            .retrieve_context_for_query("how does f work", &QueryOptions::default())
            .await
            .unwrap()
    };

    // a fresh engine over the persisted artifacts answers identically
    let engine = Engine::open(dir.path(), KnowCodeConfig::offline(DIM)).await.unwrap();
    assert!(engine.load_errors().is_empty());
    let after = engine
        .retrieve_context_for_query("how does f work", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(before.selected_entities, after.selected_entities);
    assert_eq!(before.context_text, after.context_text);
}
