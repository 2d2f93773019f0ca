//! Feedback integration and weight adaptation end to end.

use engram_e2e_tests::TestHarness;
use engram_core::{FeedbackInput, SearchOptions};

const P: &str = "agent-1";

#[tokio::test]
async fn helpful_feedback_saturates_then_ema_pulls_back() {
    let harness = TestHarness::new();
    let record = harness.create(P, "feedback subject").await;

    // Ten thumbs-up from the 0.5 start clamp at 1.0.
    let mut score = 0.0;
    for _ in 0..10 {
        score = harness
            .engine
            .apply_feedback(P, &record.id, FeedbackInput::helpful())
            .await
            .unwrap();
    }
    assert_eq!(score, 1.0);

    // One zero-satisfaction sample: 0.3 * 0.0 + 0.7 * 1.0.
    let score = harness
        .engine
        .apply_feedback(P, &record.id, FeedbackInput::satisfaction(0.0))
        .await
        .unwrap();
    assert!((score - 0.70).abs() < 1e-9);
}

#[tokio::test]
async fn unhelpful_feedback_clamps_at_zero() {
    let harness = TestHarness::new();
    let record = harness.create(P, "unloved memory").await;
    harness.set_helpfulness(&record.id, 0.0);

    let score = harness
        .engine
        .apply_feedback(P, &record.id, FeedbackInput::unhelpful())
        .await
        .unwrap();
    assert_eq!(score, 0.0);
}

#[tokio::test]
async fn helpful_feedback_at_ceiling_stays_there() {
    let harness = TestHarness::new();
    let record = harness.create(P, "beloved memory").await;
    harness.set_helpfulness(&record.id, 1.0);

    let score = harness
        .engine
        .apply_feedback(P, &record.id, FeedbackInput::helpful())
        .await
        .unwrap();
    assert_eq!(score, 1.0);
}

#[tokio::test]
async fn negative_streak_raises_helpfulness_weight() {
    let harness = TestHarness::new();
    let record = harness.create(P, "search target").await;

    // Nine searches, then four negative feedback events, then the tenth
    // search lands on the adaptation boundary with neg_ratio 0.4.
    for i in 0..9 {
        harness
            .engine
            .search(P, &format!("warmup query {i}"), SearchOptions::default())
            .await
            .unwrap();
    }
    for _ in 0..4 {
        harness
            .engine
            .apply_feedback(P, &record.id, FeedbackInput::unhelpful())
            .await
            .unwrap();
    }
    harness
        .engine
        .search(P, "the tenth query", SearchOptions::default())
        .await
        .unwrap();

    let weights = harness.store.get_weights(P).unwrap();
    assert_eq!(weights.total_searches, 10);
    assert!((weights.helpfulness_weight - 0.55).abs() < 1e-9);
    assert!((weights.usage_weight - 0.3).abs() < 1e-9);
    assert!((weights.recency_weight - 0.2).abs() < 1e-9);
    assert!((weights.relationship_weight - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn consistent_negative_pattern_converges_to_ceiling() {
    let harness = TestHarness::new();
    let record = harness.create(P, "chronically wrong answer").await;

    // Roughly fifty feedback events of the same shape: each ten-search
    // window carries five complaints.
    for window in 0..10 {
        for i in 0..9 {
            harness
                .engine
                .search(P, &format!("window {window} query {i}"), SearchOptions::default())
                .await
                .unwrap();
        }
        for _ in 0..5 {
            harness
                .engine
                .apply_feedback(P, &record.id, FeedbackInput::unhelpful())
                .await
                .unwrap();
        }
        harness
            .engine
            .search(P, &format!("window {window} boundary"), SearchOptions::default())
            .await
            .unwrap();
    }

    let weights = harness.store.get_weights(P).unwrap();
    assert!((weights.helpfulness_weight - 0.80).abs() < 1e-9);
}

#[tokio::test]
async fn satisfaction_feeds_the_principal_average() {
    let harness = TestHarness::new();
    let record = harness.create(P, "satisfaction subject").await;

    harness
        .engine
        .apply_feedback(P, &record.id, FeedbackInput::satisfaction(1.0))
        .await
        .unwrap();

    let weights = harness.store.get_weights(P).unwrap();
    // 0.3 * 1.0 + 0.7 * 0.5
    assert!((weights.avg_search_satisfaction - 0.65).abs() < 1e-9);
    assert_eq!(weights.positive_feedback_count, 1);
}

#[tokio::test]
async fn feedback_on_foreign_memory_is_not_found() {
    let harness = TestHarness::new();
    let record = harness.create("agent-a", "someone else's memory").await;
    let result = harness
        .engine
        .apply_feedback("agent-b", &record.id, FeedbackInput::helpful())
        .await;
    assert!(result.is_err());

    // And the owner's score is untouched.
    let current = harness
        .store
        .get_memory("agent-a", &record.id)
        .unwrap()
        .unwrap();
    assert!((current.helpfulness_score - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn out_of_range_satisfaction_is_rejected() {
    let harness = TestHarness::new();
    let record = harness.create(P, "bounds check").await;
    let bad = FeedbackInput {
        helpful: true,
        satisfaction: Some(1.5),
        context: None,
    };
    assert!(harness.engine.apply_feedback(P, &record.id, bad).await.is_err());
}
