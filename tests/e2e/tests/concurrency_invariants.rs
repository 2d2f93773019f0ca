//! Concurrency and schema invariants under contention and degradation.

use std::sync::Arc;

use engram_e2e_tests::TestHarness;
use engram_core::{
    EngineConfig, FeedbackInput, Relationship, RelationshipType, SearchOptions,
};

const P: &str = "agent-1";

#[tokio::test]
async fn concurrent_access_tracking_loses_no_updates() {
    let harness = TestHarness::new();
    let record = harness.create(P, "contended memory").await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = Arc::clone(&harness.store);
        let id = record.id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            store.record_access(&id, Some("burst"))
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let current = harness.store.get_memory(P, &record.id).unwrap().unwrap();
    assert_eq!(current.usage_count, 20);
    assert_eq!(current.access_pattern.contexts.get("burst"), Some(&20));
    assert!(current.last_accessed.unwrap() >= current.created_at);
}

#[tokio::test]
async fn two_concurrent_accesses_net_exactly_two() {
    let harness = TestHarness::new();
    let record = harness.create(P, "pairwise contention").await;

    let store_a = Arc::clone(&harness.store);
    let store_b = Arc::clone(&harness.store);
    let id_a = record.id.clone();
    let id_b = record.id.clone();
    let (a, b) = tokio::join!(
        tokio::task::spawn_blocking(move || store_a.record_access(&id_a, None)),
        tokio::task::spawn_blocking(move || store_b.record_access(&id_b, None)),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let current = harness.store.get_memory(P, &record.id).unwrap().unwrap();
    assert_eq!(current.usage_count, 2);
}

#[tokio::test]
async fn score_stays_in_bounds_under_mixed_feedback() {
    let harness = TestHarness::new();
    let record = harness.create(P, "score bounds subject").await;

    let inputs = [
        FeedbackInput::helpful(),
        FeedbackInput::unhelpful(),
        FeedbackInput::satisfaction(0.0),
        FeedbackInput::helpful(),
        FeedbackInput::satisfaction(1.0),
        FeedbackInput::unhelpful(),
        FeedbackInput::unhelpful(),
        FeedbackInput::satisfaction(0.5),
    ];
    for input in inputs {
        let score = harness
            .engine
            .apply_feedback(P, &record.id, input)
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&score), "score {score} out of bounds");
    }

    let current = harness.store.get_memory(P, &record.id).unwrap().unwrap();
    assert!((0.0..=1.0).contains(&current.helpfulness_score));
    assert!(current.usage_count >= 0);
}

#[tokio::test]
async fn duplicate_relationship_is_a_conflict() {
    let harness = TestHarness::new();
    let a = harness.create(P, "from endpoint").await;
    let b = harness.create(P, "to endpoint").await;

    harness
        .store
        .insert_relationship(
            &Relationship::new(P, &a.id, &b.id, RelationshipType::RelatedTo, 0.5, "").unwrap(),
        )
        .unwrap();
    let duplicate = harness.store.insert_relationship(
        &Relationship::new(P, &a.id, &b.id, RelationshipType::Contradicts, 0.9, "").unwrap(),
    );
    assert!(duplicate.is_err());
    assert_eq!(harness.store.relationships_for(P).unwrap().len(), 1);

    // The reverse direction is a distinct edge.
    harness
        .store
        .insert_relationship(
            &Relationship::new(P, &b.id, &a.id, RelationshipType::Follows, 0.5, "").unwrap(),
        )
        .unwrap();
    assert_eq!(harness.store.relationships_for(P).unwrap().len(), 2);
}

#[tokio::test]
async fn open_breaker_degrades_search_but_not_ingest() {
    let mut config = EngineConfig::default();
    config.circuit_breaker.threshold = 1;
    let harness = TestHarness::with_config(config);
    harness.create(P, "pre-outage memory").await;

    harness.embedder.set_failing(true);

    // The first failing call trips the threshold-1 breaker.
    let response = harness
        .engine
        .search(P, "query during outage", SearchOptions::default())
        .await
        .unwrap();
    assert!(response.degraded);
    assert!(response.results.is_empty());

    // With the breaker open the next search fails fast, still degraded.
    let response = harness
        .engine
        .search(P, "another outage query", SearchOptions::default())
        .await
        .unwrap();
    assert!(response.degraded);

    // Ingest keeps working; the record just lacks an embedding.
    let record = harness.create(P, "written during outage").await;
    assert!(!record.has_embedding);

    // Feedback (a critical path) is unaffected as well.
    let score = harness
        .engine
        .apply_feedback(P, &record.id, FeedbackInput::helpful())
        .await
        .unwrap();
    assert!((score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn degraded_search_does_not_count_toward_adaptation() {
    let mut config = EngineConfig::default();
    config.circuit_breaker.threshold = 1;
    let harness = TestHarness::with_config(config);
    harness.create(P, "counter subject").await;

    harness.embedder.set_failing(true);
    harness
        .engine
        .search(P, "degraded query", SearchOptions::default())
        .await
        .unwrap();

    let weights = harness.store.get_weights(P).unwrap();
    assert_eq!(weights.total_searches, 0);
}

#[tokio::test]
async fn unembedded_memories_never_block_search() {
    let mut config = EngineConfig::default();
    config.circuit_breaker.threshold = 1;
    config.circuit_breaker.timeout_seconds = 1;
    let harness = TestHarness::with_config(config);

    // One embedded memory, then an outage, then an unembedded one.
    harness.embedder.set_similarity("findable memory", 0.9);
    harness.embedder.set_similarity("probe query", 1.0);
    let findable = harness.create(P, "findable memory").await;

    harness.embedder.set_failing(true);
    harness.create(P, "invisible memory").await;
    harness.embedder.set_failing(false);

    // Past the cooldown the breaker half-opens; the successful probe
    // closes it again.
    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let response = harness
        .engine
        .search(P, "probe query", SearchOptions::default())
        .await
        .unwrap();

    assert!(!response.degraded);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.id, findable.id);
}
