//! Shared test helpers for `orbit-core` and its adapter implementations.
//!
//! Provides:
//! - A deterministic [`DeterministicEmbeddingProvider`] that tests can
//!   reason about (near-identical inputs score near 1.0) without a real
//!   embedding backend.
//! - A recording [`FixedRowsClient`] that returns a canned row set per
//!   call and counts its invocations.
//! - Factories for [`Template`], [`AdapterConfig`], and
//!   [`ProcessingContext`] so adapter-level tests don't hand-roll the
//!   same boilerplate records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orbit_core::domain::RawRecord;
use orbit_core::error::Result;
use orbit_core::providers::EmbeddingProvider;
use orbit_core::retriever::intent::{DatasourceClient, ExecutionOutcome, RenderedQuery};
use orbit_core::template::{Parameter, ParameterType, QueryBody, ResultFormat, Template};
use orbit_core::types::{AdapterCapabilities, AdapterConfig, AdapterType, ProcessingContext};
use serde_json::Value;

/// A deterministic embedding: every distinct first character maps to a
/// distinct vector, so identical or near-identical strings score near
/// 1.0 cosine similarity and distinct strings score near 0.0-0.5,
/// without depending on a real model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let first = text.chars().next().unwrap_or('a') as u32 as f32;
        let len = text.len() as f32;
        Ok(vec![first, len, 1.0])
    }

    fn embedding_dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "deterministic-test-provider"
    }
}

/// A [`DatasourceClient`] that returns the same canned rows on every
/// call and counts how many times it was invoked.
pub struct FixedRowsClient {
    pub rows: Vec<RawRecord>,
    pub result_columns: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedRowsClient {
    #[must_use]
    pub fn new(rows: Vec<RawRecord>, result_columns: Vec<String>) -> Self {
        Self {
            rows,
            result_columns,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasourceClient for FixedRowsClient {
    async fn execute(&self, _rendered: &RenderedQuery) -> Result<ExecutionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionOutcome {
            rows: self.rows.clone(),
            result_columns: self.result_columns.clone(),
            response_metadata: HashMap::new(),
        })
    }
}

/// Build a minimal required string parameter, captured from a single
/// regex group.
#[must_use]
pub fn string_parameter(name: &str, extraction_pattern: &str) -> Parameter {
    Parameter {
        name: name.to_string(),
        param_type: ParameterType::String,
        required: true,
        default: None,
        allowed_values: None,
        extraction_patterns: vec![extraction_pattern.to_string()],
        format: None,
        min: None,
        max: None,
    }
}

/// Build a minimal SQL template with one bound parameter, natural-
/// language examples, and no display metadata.
#[must_use]
pub fn sql_template(id: &str, sql: &str, nl_examples: &[&str], parameters: Vec<Parameter>) -> Template {
    Template {
        id: id.to_string(),
        version: "1".to_string(),
        description: id.replace(['-', '_'], " "),
        nl_examples: nl_examples.iter().map(|s| (*s).to_string()).collect(),
        semantic_tags: Vec::new(),
        parameters,
        body: QueryBody::Sql { sql: sql.to_string() },
        result_format: ResultFormat::default(),
        display_fields: Vec::new(),
        tags: Vec::new(),
        timeout_secs: None,
    }
}

/// Build a minimal enabled [`AdapterConfig`] for an intent-style
/// retriever adapter, with no declared capabilities (so inference runs).
#[must_use]
pub fn intent_adapter_config(name: &str, datasource: &str) -> AdapterConfig {
    let mut config = AdapterConfig::new(name, AdapterType::Retriever, datasource, "intent");
    config.implementation = format!("intent::{datasource}");
    config
}

/// Build an [`AdapterConfig`] with explicit capabilities, bypassing
/// inference.
#[must_use]
pub fn adapter_config_with_capabilities(name: &str, datasource: &str, capabilities: AdapterCapabilities) -> AdapterConfig {
    let mut config = intent_adapter_config(name, datasource);
    config.capabilities = Some(capabilities);
    config
}

/// Build a fresh [`ProcessingContext`] with a session id set, for tests
/// exercising the follow-up cache or threading-aware capabilities.
#[must_use]
pub fn context_with_session(message: &str, adapter_name: &str, session_id: &str) -> ProcessingContext {
    let mut context = ProcessingContext::new(message, adapter_name);
    context.session_id = Some(session_id.to_string());
    context
}

/// Build a `RawRecord` from `(key, value)` pairs.
#[must_use]
pub fn record(pairs: &[(&str, Value)]) -> RawRecord {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_provider_is_stable_across_calls() {
        let provider = DeterministicEmbeddingProvider;
        let a = provider.embed_text("Engineering").await.unwrap();
        let b = provider.embed_text("Engineering").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fixed_rows_client_counts_calls() {
        let client = FixedRowsClient::new(vec![record(&[("k", Value::String("v".to_string()))])], vec!["k".to_string()]);
        let rendered = RenderedQuery::Sql(orbit_core::retriever::intent::sql::BoundStatement {
            statement: "SELECT 1".to_string(),
            bound_params: HashMap::new(),
        });
        client.execute(&rendered).await.unwrap();
        client.execute(&rendered).await.unwrap();
        assert_eq!(client.call_count(), 2);
    }

    #[test]
    fn sql_template_factory_declares_matching_parameter() {
        let template = sql_template(
            "employees-by-department",
            "SELECT * FROM employee WHERE department = :department",
            &["employees in a department"],
            vec![string_parameter("department", r"in (\w+)")],
        );
        assert!(template.validate_declared_parameters().is_ok());
    }

    #[test]
    fn intent_adapter_config_defaults_to_inferred_capabilities() {
        let config = intent_adapter_config("intent-sql-postgres", "postgres");
        assert!(config.capabilities.is_none());
        assert_eq!(config.adapter, "intent");
    }
}
