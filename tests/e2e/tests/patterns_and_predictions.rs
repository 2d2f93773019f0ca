//! Pattern mining, relationship suggestions, and the predictor.

use chrono::{Timelike, Utc};
use engram_e2e_tests::TestHarness;
use engram_core::{
    CandidatePattern, PatternType, PredictionRequest, Relationship, RelationshipType,
};

const P: &str = "agent-1";

#[tokio::test]
async fn predictor_reports_reasons_per_channel() {
    let harness = TestHarness::new();
    let a = harness.create(P, "memory alpha").await;
    let b = harness.create(P, "memory beta").await;
    let c = harness.create(P, "memory gamma").await;
    let d = harness.create(P, "memory delta").await;

    let now = Utc::now();
    // Co-access pair (A, B) seen fifteen times.
    harness
        .store
        .upsert_pattern(
            P,
            &CandidatePattern::co_access(a.id.clone(), b.id.clone(), 15, 8, 7),
            now,
        )
        .unwrap();
    // Relationship A -> C with strength 0.9.
    harness
        .store
        .insert_relationship(
            &Relationship::new(P, &a.id, &c.id, RelationshipType::RelatedTo, 0.9, "seeded")
                .unwrap(),
        )
        .unwrap();
    // Hourly pattern bound to the current hour containing D.
    harness
        .store
        .upsert_pattern(
            P,
            &CandidatePattern::hourly(now.hour(), vec![d.id.clone()]),
            now,
        )
        .unwrap();

    let request = PredictionRequest {
        recent_ids: vec![a.id.clone()],
        context_text: None,
        k: 5,
    };
    let set = harness.engine.predict(P, request).await.unwrap();
    assert!(!set.cache_hit);

    let find = |id: &str| {
        set.predictions
            .iter()
            .find(|p| p.memory_id == id)
            .unwrap_or_else(|| panic!("{id} missing from predictions"))
    };

    let b_pred = find(&b.id);
    assert!(b_pred.reasons.contains(&"frequently_accessed_with".to_string()));
    assert!(b_pred.confidence >= 0.30);

    let c_pred = find(&c.id);
    assert!(c_pred.reasons.contains(&"related_to_relationship".to_string()));
    assert!(c_pred.confidence >= 0.30);

    let d_pred = find(&d.id);
    assert!(d_pred.reasons.contains(&"temporal_pattern_hourly".to_string()));
    assert!(d_pred.confidence >= 0.30);
}

#[tokio::test]
async fn predictions_are_cached_until_memory_mutation() {
    let harness = TestHarness::new();
    let a = harness.create(P, "anchor memory").await;
    let b = harness.create(P, "companion memory").await;
    harness
        .store
        .upsert_pattern(
            P,
            &CandidatePattern::co_access(a.id.clone(), b.id.clone(), 20, 10, 10),
            Utc::now(),
        )
        .unwrap();

    let request = PredictionRequest {
        recent_ids: vec![a.id.clone()],
        context_text: None,
        k: 5,
    };
    let first = harness.engine.predict(P, request.clone()).await.unwrap();
    assert!(!first.cache_hit);

    let second = harness.engine.predict(P, request.clone()).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(
        first.predictions.len(),
        second.predictions.len(),
        "cached predictions must match"
    );

    // Deleting a memory evicts the principal's cache.
    harness.engine.delete_memory(P, &b.id).await.unwrap();
    let third = harness.engine.predict(P, request).await.unwrap();
    assert!(!third.cache_hit);
}

#[tokio::test]
async fn miner_reruns_merge_instead_of_duplicating() {
    let harness = TestHarness::new();
    let x = harness.create(P, "first of a pair").await;
    let y = harness.create(P, "second of a pair").await;

    // Drive five joint accesses through the fire-and-forget path so the
    // activity ring sees them.
    for _ in 0..5 {
        harness.tracked_access(P, &x.id).await;
        harness.tracked_access(P, &y.id).await;
    }

    let first = harness.engine.analyze(P, Some(false)).await.unwrap();
    let co_first: Vec<_> = first
        .patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::CoAccess)
        .collect();
    assert_eq!(co_first.len(), 1);
    assert_eq!(co_first[0].occurrences, 1);
    assert!((co_first[0].confidence - 0.5).abs() < 1e-9);

    // Same unchanged access log: same pattern set, one more occurrence,
    // confidence stepped up.
    let second = harness.engine.analyze(P, Some(false)).await.unwrap();
    let co_second: Vec<_> = second
        .patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::CoAccess)
        .collect();
    assert_eq!(co_second.len(), 1);
    assert_eq!(co_second[0].id, co_first[0].id);
    assert_eq!(co_second[0].occurrences, 2);
    assert!((co_second[0].confidence - 0.55).abs() < 1e-9);
    assert!(co_second[0].confidence >= co_first[0].confidence);
}

#[tokio::test]
async fn auto_apply_is_idempotent() {
    let harness = TestHarness::new();
    let a = harness
        .create_tagged(P, "first shared topic", &["rust", "memory"])
        .await;
    let b = harness
        .create_tagged(P, "second shared topic", &["rust", "memory"])
        .await;

    // count 20 with two common tags: 0.5 + 0.06 + 0.02 * 15 = 0.86.
    harness
        .store
        .upsert_pattern(
            P,
            &CandidatePattern::co_access(a.id.clone(), b.id.clone(), 20, 10, 10),
            Utc::now(),
        )
        .unwrap();

    let first = harness.engine.analyze(P, Some(true)).await.unwrap();
    assert_eq!(first.applied, 1);
    assert_eq!(harness.store.relationships_for(P).unwrap().len(), 1);

    let second = harness.engine.analyze(P, Some(true)).await.unwrap();
    assert_eq!(second.applied, 0, "re-application must be a no-op");
    assert_eq!(harness.store.relationships_for(P).unwrap().len(), 1);
}

#[tokio::test]
async fn consistent_ordering_suggests_follows() {
    let harness = TestHarness::new();
    let a = harness.create(P, "setup step").await;
    let b = harness.create(P, "execution step").await;

    harness
        .store
        .upsert_pattern(
            P,
            &CandidatePattern::co_access(a.id.clone(), b.id.clone(), 10, 9, 1),
            Utc::now(),
        )
        .unwrap();

    let report = harness.engine.analyze(P, Some(false)).await.unwrap();
    let suggestion = report
        .suggestions
        .iter()
        .find(|s| s.co_access_count == 10)
        .expect("suggestion missing");
    assert_eq!(suggestion.rel_type, RelationshipType::Follows);
    // The habitual leader is the edge source.
    assert_eq!(suggestion.from_id, a.id);
    assert_eq!(suggestion.to_id, b.id);
}

#[tokio::test]
async fn hourly_cluster_is_mined_from_access_state() {
    let harness = TestHarness::new();
    let mut ids = Vec::new();
    for i in 0..3 {
        let record = harness.create(P, &format!("hourly member {i}")).await;
        harness.record_accesses(&record.id, 1);
        ids.push(record.id);
    }

    let report = harness.engine.analyze(P, Some(false)).await.unwrap();
    let hourly: Vec<_> = report
        .patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::Hourly)
        .collect();
    // All three were just accessed; at least one hour bucket holds them.
    assert!(!hourly.is_empty());
    let members: Vec<&str> = hourly[0].memories();
    for id in &ids {
        assert!(members.contains(&id.as_str()));
    }
}
