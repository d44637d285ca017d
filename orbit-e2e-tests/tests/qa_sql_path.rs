//! Scenario: a QA-domain SQL adapter answers a direct question from a
//! single seeded row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orbit_core::breaker::{CircuitBreaker, CircuitBreakerConfig};
use orbit_core::domain::QaDomainAdapter;
use orbit_core::retriever::base::TemplateStore;
use orbit_core::retriever::intent::IntentRetriever;
use orbit_core::retriever::Retriever;
use orbit_core::retry::RetryConfig;
use orbit_test_utils::{record, sql_template, string_parameter, DeterministicEmbeddingProvider, FixedRowsClient};
use serde_json::json;

#[tokio::test]
async fn city_hall_phone_number_is_answered_from_seeded_row() {
    let template = sql_template(
        "city-hall-phone",
        "SELECT question, answer FROM city WHERE question LIKE :question",
        &["what is the city hall phone number"],
        vec![string_parameter("question", r"(.+)")],
    );

    let mut store = TemplateStore::new();
    store.load(vec![template], &DeterministicEmbeddingProvider).await.unwrap();

    let row = record(&[
        ("question", json!("What is the city hall phone number?")),
        ("answer", json!("555-0100")),
    ]);
    let client = Arc::new(FixedRowsClient::new(vec![row], vec!["question".to_string(), "answer".to_string()]));
    let breaker = Arc::new(CircuitBreaker::new("qa-sql", CircuitBreakerConfig::default()));

    let retriever = IntentRetriever::new(
        "qa-sql",
        "sqlite",
        store,
        0.3,
        client.clone(),
        Box::new(QaDomainAdapter),
        Arc::new(DeterministicEmbeddingProvider),
        breaker,
        RetryConfig::default(),
        Duration::from_secs(1),
    );

    let docs = retriever
        .get_relevant_context("city hall phone", &HashMap::new())
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert!(docs[0].content.contains("555-0100"));
    assert!(docs[0].confidence >= 0.3);
    assert_eq!(docs[0].metadata["source"], json!("intent"));
    assert_eq!(docs[0].metadata["template_id"], json!("city-hall-phone"));
    assert_eq!(docs[0].metadata["datasource"], json!("sqlite"));
    assert_eq!(client.call_count(), 1);
}
