//! Maintenance buckets and memory lifecycle (update, delete, cascades).

use engram_e2e_tests::TestHarness;
use engram_core::{MemoryPatch, Relationship, RelationshipType};

const P: &str = "agent-1";

#[tokio::test]
async fn outdated_wins_over_archive() {
    let harness = TestHarness::new();
    // Old, unhelpful, long-untouched, never counted as used: qualifies
    // for both outdated and archive. Priority keeps it in outdated only.
    let record = harness.create(P, "a note nobody wants anymore").await;
    harness.set_helpfulness(&record.id, 0.2);
    harness.backdate(&record.id, Some(200), Some(120));

    let report = harness.engine.maintenance_report(P).await.unwrap();
    assert_eq!(report.outdated.len(), 1);
    assert_eq!(report.outdated[0].id, record.id);
    assert!(report.archive_candidates.is_empty());
    assert!(report.duplicates.is_empty());
    assert_eq!(report.stale_count(), 1);
}

#[tokio::test]
async fn near_identical_texts_pair_as_duplicates() {
    let harness = TestHarness::new();
    let first = harness
        .create(
            P,
            "the deploy pipeline requires manual approval from the release manager before any \
             production rollout can proceed and the approval must be recorded every time",
        )
        .await;
    let second = harness
        .create(
            P,
            "the deploy pipeline requires manual approval from the release manager before any \
             production rollout can proceed and the approval must be recorded each time",
        )
        .await;
    harness.create(P, "completely different topic entirely").await;

    // Make the pair also look outdated; duplicates must still claim it.
    harness.set_helpfulness(&first.id, 0.1);
    harness.backdate(&first.id, Some(300), Some(120));

    let report = harness.engine.maintenance_report(P).await.unwrap();
    assert_eq!(report.duplicates.len(), 1);
    assert!(report.duplicates[0].similarity >= 0.85);
    let pair = [
        report.duplicates[0].first_id.clone(),
        report.duplicates[0].second_id.clone(),
    ];
    assert!(pair.contains(&first.id));
    assert!(pair.contains(&second.id));
    assert!(report.outdated.is_empty());
}

#[tokio::test]
async fn archive_requires_zero_usage() {
    let harness = TestHarness::new();
    let unused = harness.create(P, "never read since the beginning").await;
    harness.backdate(&unused.id, Some(200), None);

    let used = harness.create(P, "old but occasionally consulted").await;
    harness.record_accesses(&used.id, 2);
    harness.backdate(&used.id, Some(200), Some(5));

    let report = harness.engine.maintenance_report(P).await.unwrap();
    assert_eq!(report.archive_candidates.len(), 1);
    assert_eq!(report.archive_candidates[0].id, unused.id);
}

#[tokio::test]
async fn delete_cascades_relationships_and_returns_not_found() {
    let harness = TestHarness::new();
    let a = harness.create(P, "edge source").await;
    let b = harness.create(P, "edge target").await;
    harness
        .store
        .insert_relationship(
            &Relationship::new(P, &a.id, &b.id, RelationshipType::CausedBy, 0.7, "").unwrap(),
        )
        .unwrap();

    harness.engine.delete_memory(P, &a.id).await.unwrap();

    assert!(harness.engine.get_memory(P, &a.id, None).await.is_err());
    assert!(harness.store.relationships_for(P).unwrap().is_empty());
    // The surviving endpoint is untouched.
    assert!(harness.engine.get_memory(P, &b.id, None).await.is_ok());
    // Deleting again reports NotFound.
    assert!(harness.engine.delete_memory(P, &a.id).await.is_err());
}

#[tokio::test]
async fn update_patches_content_and_reembeds() {
    let harness = TestHarness::new();
    harness.embedder.set_similarity("query for updates", 1.0);
    harness.embedder.set_similarity("text before update", 0.2);
    harness.embedder.set_similarity("text after update", 0.95);

    let record = harness.create(P, "text before update").await;
    let patch = MemoryPatch {
        text: Some("text after update".to_string()),
        tags: Some(vec!["revised".to_string()]),
        ..Default::default()
    };
    let updated = harness.engine.update_memory(P, &record.id, patch).await.unwrap();
    assert_eq!(updated.text, "text after update");
    assert_eq!(updated.tags, vec!["revised"]);
    assert!(updated.has_embedding);
    assert!(updated.updated_at >= updated.created_at);

    // The new embedding is what search sees.
    let response = harness
        .engine
        .search(P, "query for updates", Default::default())
        .await
        .unwrap();
    assert_eq!(response.results[0].memory.id, record.id);
    assert!((response.results[0].base_similarity - 0.95).abs() < 1e-5);
}

#[tokio::test]
async fn learning_metrics_surface_feedback_series() {
    let harness = TestHarness::new();
    let record = harness.create(P, "metric subject").await;

    for value in [0.2, 0.4, 0.8, 0.9] {
        harness
            .engine
            .apply_feedback(
                P,
                &record.id,
                engram_core::FeedbackInput::satisfaction(value),
            )
            .await
            .unwrap();
    }

    let report = harness.engine.learning_metrics(P, 7).await.unwrap();
    let satisfaction = report
        .series
        .iter()
        .find(|s| s.metric_type == engram_core::MetricType::UserSatisfaction)
        .expect("satisfaction series missing");
    assert_eq!(satisfaction.samples, 4);
    assert_eq!(satisfaction.trend, engram_core::TrendDirection::Improving);

    let helpfulness = report
        .series
        .iter()
        .find(|s| s.metric_type == engram_core::MetricType::AvgHelpfulness);
    assert!(helpfulness.is_some());
}

#[tokio::test]
async fn stats_reflect_store_counts() {
    let harness = TestHarness::new();
    harness.create(P, "one").await;
    harness.create(P, "two").await;

    let stats = harness.engine.stats(P).await.unwrap();
    assert_eq!(stats.store.memory_count, 2);
    assert_eq!(stats.store.invariant_violations, 0);
    assert_eq!(stats.breakers.len(), 2);
}
