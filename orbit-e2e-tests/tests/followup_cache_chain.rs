//! Scenario: a single session's query sequence against the follow-up
//! cache — an accepted follow-up, a refresh-keyword bypass, and an
//! applicability rejection.

use std::time::Duration;

use orbit_core::cache::types::{CacheKey, CachedResult, ResultMetadata};
use orbit_core::cache::{FollowupCache, FollowupCacheConfig};
use orbit_core::providers::HeuristicFollowupClassifier;

fn seed_q4_sales_by_region() -> CachedResult {
    CachedResult::new(
        "Show me Q4 sales by region",
        vec![1.0, 0.0, 0.0],
        "SELECT region, SUM(total) FROM sales GROUP BY region",
        vec![serde_json::json!({"region": "west", "total": 100})],
        vec!["region".to_string(), "total".to_string()],
        ResultMetadata::default(),
        Duration::from_secs(900),
        5,
    )
}

#[tokio::test]
async fn followup_accepted_then_refresh_bypass_then_applicability_rejection() {
    let cache = FollowupCache::new(FollowupCacheConfig::default());
    let key = CacheKey::new("s1", "intent-sql-postgres");
    let classifier = HeuristicFollowupClassifier;

    // Q1: seed the cache as if the SQL path had just executed.
    cache.store(key.clone(), seed_q4_sales_by_region()).await.unwrap();

    // Q2: a semantically close follow-up is accepted without re-executing SQL.
    let q2_embedding = vec![0.99, 0.01, 0.0];
    let decision = cache
        .evaluate(&key, "What were the top regions?", Some(&q2_embedding), false, Some(&classifier))
        .await
        .unwrap();
    assert!(decision.cache_hit);
    assert!(decision.followup_confidence >= FollowupCacheConfig::default().threshold_high);
    cache.accept_followup(&key, q2_embedding).await;
    assert!(cache.get_snapshot(&key).await.is_some());

    // Q3: "latest" plus high confidence clears the cache and forces a
    // fresh execution.
    let q3_embedding = vec![0.99, 0.01, 0.0];
    let decision = cache
        .evaluate(&key, "Show me latest Q4 sales by region", Some(&q3_embedding), false, Some(&classifier))
        .await
        .unwrap();
    assert!(!decision.cache_hit);
    assert!(decision.cache_refresh);
    assert_eq!(decision.refresh_reason.as_deref(), Some("keywords_detected"));
    assert!(cache.get_snapshot(&key).await.is_none());

    // Re-seed as if Q3 had re-executed and re-cached the same shape.
    cache.store(key.clone(), seed_q4_sales_by_region()).await.unwrap();

    // Q4: a dimension absent from result_columns is rejected with a named reason.
    let q4_embedding = vec![0.99, 0.01, 0.0];
    let decision = cache
        .evaluate(&key, "Show me top products", Some(&q4_embedding), false, Some(&classifier))
        .await
        .unwrap();
    assert!(!decision.cache_hit);
    assert_eq!(decision.cache_applicability_reason.as_deref(), Some("missing_dimension:product"));
    assert!(cache.get_snapshot(&key).await.is_none());
}
