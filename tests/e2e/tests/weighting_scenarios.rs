//! Ranking scenarios: usage boosting, recency decay, and boundary
//! behavior of the weighted search path.

use engram_e2e_tests::TestHarness;
use engram_core::{CreateMemoryInput, SearchOptions};

const P: &str = "agent-1";

#[tokio::test]
async fn heavy_usage_outranks_raw_similarity() {
    let harness = TestHarness::new();
    harness.embedder.set_similarity("the query", 1.0);

    // Five memories with descending base similarity to the query.
    let sims = [0.90f32, 0.85, 0.80, 0.75, 0.70];
    let mut ids = Vec::new();
    for (i, sim) in sims.iter().enumerate() {
        let text = format!("memory number {i}");
        harness.embedder.set_similarity(&text, *sim);
        let record = harness.create(P, &text).await;
        ids.push(record.id);
    }

    // The least similar memory gets used heavily.
    harness.record_accesses(&ids[4], 100);

    let options = SearchOptions {
        k: 5,
        weight_by_usage: true,
        adaptive_weights: false,
        ..Default::default()
    };
    let response = harness.engine.search(P, "the query", options).await.unwrap();

    assert_eq!(response.results.len(), 5);
    let top = &response.results[0];
    assert_eq!(top.memory.id, ids[4]);
    assert!(top.usage_boosted);
    // score >= 0.70 * (1 + 0.3 * ln(101)) * (0.5 * 0.5 + 0.5)
    assert!(top.score > 1.2, "expected boosted score, got {}", top.score);
    // The unused 0.90 memory scores 0.90 * 0.75.
    let runner_up = response
        .results
        .iter()
        .find(|r| r.memory.id == ids[0])
        .unwrap();
    assert!((runner_up.score - 0.675).abs() < 1e-6);
}

#[tokio::test]
async fn stale_memory_decays_below_fresh_twin() {
    let harness = TestHarness::new();
    harness.embedder.set_similarity("twin query", 1.0);
    harness.embedder.set_similarity("fresh twin", 0.80);
    harness.embedder.set_similarity("stale twin", 0.80);

    let fresh = harness.create(P, "fresh twin").await;
    let stale = harness.create(P, "stale twin").await;

    harness.record_accesses(&fresh.id, 1);
    harness.backdate(&stale.id, Some(365), Some(120));

    let options = SearchOptions {
        k: 2,
        weight_by_usage: false,
        decay_old_memories: true,
        adaptive_weights: false,
        ..Default::default()
    };
    let response = harness.engine.search(P, "twin query", options).await.unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].memory.id, fresh.id);
    assert!(response.results[0].recency_boosted);
    assert_eq!(response.results[1].memory.id, stale.id);
    assert!(response.results[1].recency_decayed);
    assert!(response.results[0].score > response.results[1].score);
}

#[tokio::test]
async fn oversized_k_is_clamped() {
    let harness = TestHarness::new();
    for i in 0..5 {
        harness.create(P, &format!("filler {i}")).await;
    }
    let options = SearchOptions {
        k: 500,
        ..Default::default()
    };
    let response = harness.engine.search(P, "filler", options).await.unwrap();
    assert!(response.results.len() <= 100);

    // k below the floor clamps to one result, never an error.
    let options = SearchOptions {
        k: 0,
        ..Default::default()
    };
    let response = harness.engine.search(P, "filler", options).await.unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn empty_corpus_returns_empty_result() {
    let harness = TestHarness::new();
    let response = harness
        .engine
        .search(P, "anything at all", SearchOptions::default())
        .await
        .unwrap();
    assert!(response.results.is_empty());
    assert!(!response.degraded);
}

#[tokio::test]
async fn min_helpfulness_filters_candidates() {
    let harness = TestHarness::new();
    harness.embedder.set_similarity("filter query", 1.0);
    harness.embedder.set_similarity("good memory", 0.8);
    harness.embedder.set_similarity("bad memory", 0.9);

    let good = harness.create(P, "good memory").await;
    let bad = harness.create(P, "bad memory").await;
    harness.set_helpfulness(&good.id, 0.9);
    harness.set_helpfulness(&bad.id, 0.1);

    let options = SearchOptions {
        min_helpfulness_score: Some(0.5),
        ..Default::default()
    };
    let response = harness.engine.search(P, "filter query", options).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.id, good.id);
}

#[tokio::test]
async fn create_then_get_roundtrips_content_fields() {
    let harness = TestHarness::new();
    let mut input = CreateMemoryInput::from_text("the api gateway lives in us-east-1");
    input.tags = vec!["infra".to_string(), "aws".to_string()];
    input.source = Some("runbook".to_string());
    input.project_id = Some("platform".to_string());

    let created = harness.engine.create_memory(P, input).await.unwrap();
    let fetched = harness.engine.get_memory(P, &created.id, None).await.unwrap();

    assert_eq!(fetched.memory.text, "the api gateway lives in us-east-1");
    assert_eq!(fetched.memory.tags, vec!["infra", "aws"]);
    assert_eq!(fetched.memory.source.as_deref(), Some("runbook"));
    assert_eq!(fetched.memory.project_id.as_deref(), Some("platform"));
    assert_eq!(fetched.memory.principal_id, P);
    assert_eq!(fetched.memory.created_at, created.created_at);
}

#[tokio::test]
async fn principals_cannot_read_each_other() {
    let harness = TestHarness::new();
    let record = harness.create("agent-a", "private note").await;
    let result = harness.engine.get_memory("agent-b", &record.id, None).await;
    assert!(result.is_err());
}
