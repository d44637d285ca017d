//! Intent retrievers: select a template by embedding similarity, extract
//! and validate its parameters, render a backend-specific query, execute
//! it through a circuit breaker with retry, and format the rows via the
//! configured domain adapter.
//!
//! One [`IntentRetriever`] instance owns exactly one [`TemplateStore`] and
//! one [`DatasourceClient`]; separate backends (SQL, HTTP,
//! Elasticsearch, MongoDB) are distinguished by the client's
//! implementation and by which [`QueryBody`] variant a loaded template
//! uses, not by separate retriever types.

pub mod elasticsearch;
pub mod extraction;
pub mod http;
pub mod mongodb;
pub mod sql;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::instrument;

use crate::breaker::CircuitBreaker;
use crate::domain::{DomainAdapter, RawRecord};
use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::retriever::base::TemplateStore;
use crate::retriever::Retriever;
use crate::retry::RetryPolicy;
use crate::template::QueryBody;
use crate::types::Document;

/// A backend-rendered query, ready to execute. Exactly one variant per
/// template's [`QueryBody`] kind.
#[derive(Debug, Clone)]
pub enum RenderedQuery {
    Sql(sql::BoundStatement),
    Http(http::RenderedRequest),
    ElasticsearchDsl(Value),
    MongoPipeline(Vec<Value>),
}

/// Rows plus response metadata returned by a [`DatasourceClient`] call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub rows: Vec<RawRecord>,
    pub result_columns: Vec<String>,
    pub response_metadata: HashMap<String, Value>,
}

/// The sole external-collaborator seam for intent retrievers: executing
/// an already-rendered query against a concrete datasource. Concrete
/// drivers (a SQL connection pool, an HTTP client, an Elasticsearch/Mongo
/// client) live outside this crate; this trait is what the registry's
/// adapter factories wire in.
#[async_trait]
pub trait DatasourceClient: Send + Sync {
    async fn execute(&self, rendered: &RenderedQuery) -> Result<ExecutionOutcome>;
}

/// The concrete [`Retriever`] implementation for every intent-driven
/// adapter: template selection, parameter handling, rendering,
/// execution, and formatting all run through one instance.
pub struct IntentRetriever {
    name: String,
    datasource: String,
    store: TemplateStore,
    confidence_threshold: f64,
    client: Arc<dyn DatasourceClient>,
    domain_adapter: Box<dyn DomainAdapter>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    breaker: Arc<CircuitBreaker>,
    retry_config: crate::retry::RetryConfig,
    timeout: Duration,
}

/// Retriever-kind tag written into every returned document's
/// `source` metadata field, distinct from the adapter's configured
/// `name`.
const RETRIEVER_KIND: &str = "intent";

impl IntentRetriever {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        datasource: impl Into<String>,
        store: TemplateStore,
        confidence_threshold: f64,
        client: Arc<dyn DatasourceClient>,
        domain_adapter: Box<dyn DomainAdapter>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        breaker: Arc<CircuitBreaker>,
        retry_config: crate::retry::RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            datasource: datasource.into(),
            store,
            confidence_threshold,
            client,
            domain_adapter,
            embedding_provider,
            breaker,
            retry_config,
            timeout,
        }
    }

    fn render(&self, template: &crate::template::Template, extracted: &HashMap<String, Value>) -> Result<RenderedQuery> {
        match &template.body {
            QueryBody::Sql { .. } => sql::render(template, extracted).map(RenderedQuery::Sql),
            QueryBody::Http { .. } => http::render(template, extracted).map(RenderedQuery::Http),
            QueryBody::QueryDsl { query_dsl } => {
                if query_dsl.is_array() {
                    mongodb::render(template, extracted).map(RenderedQuery::MongoPipeline)
                } else {
                    elasticsearch::render(template, extracted).map(RenderedQuery::ElasticsearchDsl)
                }
            }
            QueryBody::Tool { .. } => Err(Error::TemplateRenderError {
                template_id: template.id.clone(),
                reason: "tool-call bodies are not executed by the intent retriever".to_string(),
            }),
        }
    }

    async fn execute_with_retry_and_breaker(&self, rendered: RenderedQuery) -> Result<ExecutionOutcome> {
        let client = Arc::clone(&self.client);
        let call_timeout = self.timeout;
        let mut policy = RetryPolicy::with_config(self.retry_config.clone());
        self.breaker
            .call(|| async {
                let rendered = &rendered;
                policy
                    .execute(|| async {
                        match timeout(call_timeout, client.execute(rendered)).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::Timeout(call_timeout)),
                        }
                    })
                    .await
            })
            .await
    }
}

#[async_trait]
impl Retriever for IntentRetriever {
    #[instrument(skip(self, kwargs), fields(retriever = %self.name))]
    async fn get_relevant_context(&self, query: &str, kwargs: &HashMap<String, Value>) -> Result<Vec<Document>> {
        let query_embedding = self.embedding_provider.embed_text(query).await?;

        let Some(template_match) = self.store.best_match(&self.name, &query_embedding, self.confidence_threshold) else {
            let mut metadata = HashMap::new();
            metadata.insert(
                super::base::NO_MATCH_METADATA_KEY.to_string(),
                Value::Bool(true),
            );
            return Ok(vec![Document {
                content: String::new(),
                metadata,
                confidence: 0.0,
            }]);
        };

        let template = &template_match.template_data;
        let mut extracted = extraction::extract_parameters(&template.id, query, &template.parameters)?;
        for (key, value) in kwargs {
            extracted.entry(key.clone()).or_insert_with(|| value.clone());
        }
        extraction::validate_parameters(&template.parameters, &extracted)?;

        let rendered = self.render(template, &extracted)?;
        let outcome = self.execute_with_retry_and_breaker(rendered).await?;

        let mut documents: Vec<Document> = outcome
            .rows
            .iter()
            .map(|row| {
                let mut metadata = HashMap::new();
                metadata.insert("source".to_string(), Value::String(RETRIEVER_KIND.to_string()));
                metadata.insert("template_id".to_string(), Value::String(template.id.clone()));
                metadata.insert("datasource".to_string(), Value::String(self.datasource.clone()));
                self.domain_adapter.format_document(row, metadata)
            })
            .collect();

        documents = self.domain_adapter.apply_domain_specific_filtering(documents, query);
        Ok(documents)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn search_templates(
        &self,
        query_embedding: &[f32],
        confidence_threshold: f64,
        max_templates: usize,
    ) -> Vec<crate::template::TemplateMatch> {
        self.store
            .match_query(&self.name, query_embedding, confidence_threshold)
            .into_iter()
            .take(max_templates)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use crate::domain::GenericDomainAdapter;
    use crate::template::{Parameter, ParameterType, ResultFormat, Template};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider;

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let c = text.chars().next().unwrap_or('a') as u32 as f32;
            Ok(vec![c, 1.0, 0.0])
        }
        fn embedding_dimension(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct StubClient {
        calls: Arc<AtomicUsize>,
        rows: Vec<RawRecord>,
    }

    #[async_trait]
    impl DatasourceClient for StubClient {
        async fn execute(&self, _rendered: &RenderedQuery) -> Result<ExecutionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionOutcome {
                rows: self.rows.clone(),
                result_columns: vec!["department".to_string()],
                response_metadata: HashMap::new(),
            })
        }
    }

    fn sql_template() -> Template {
        Template {
            id: "employees_by_department".to_string(),
            version: "1".to_string(),
            description: "Employees in a department".to_string(),
            nl_examples: vec!["Employees in a department".to_string()],
            semantic_tags: Vec::new(),
            parameters: vec![Parameter {
                name: "department".to_string(),
                param_type: ParameterType::String,
                required: true,
                default: None,
                allowed_values: None,
                extraction_patterns: vec![r"in (\w+)".to_string()],
                format: None,
                min: None,
                max: None,
            }],
            body: QueryBody::Sql {
                sql: "SELECT * FROM employee WHERE department = :department".to_string(),
            },
            result_format: ResultFormat::default(),
            display_fields: Vec::new(),
            tags: Vec::new(),
            timeout_secs: None,
        }
    }

    async fn build_retriever(rows: Vec<RawRecord>) -> (IntentRetriever, Arc<AtomicUsize>) {
        let mut store = TemplateStore::new();
        store.load(vec![sql_template()], &FixedProvider).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(StubClient { calls: calls.clone(), rows });
        let breaker = Arc::new(CircuitBreaker::new("employees-sql", CircuitBreakerConfig::default()));
        let retriever = IntentRetriever::new(
            "employees-sql",
            "postgres",
            store,
            0.0,
            client,
            Box::new(GenericDomainAdapter),
            Arc::new(FixedProvider),
            breaker,
            crate::retry::RetryConfig::default(),
            Duration::from_secs(1),
        );
        (retriever, calls)
    }

    #[tokio::test]
    async fn end_to_end_selects_extracts_executes_and_formats() {
        let mut row = HashMap::new();
        row.insert("department".to_string(), json!("Engineering"));
        let (retriever, calls) = build_retriever(vec![row]).await;

        let docs = retriever
            .get_relevant_context("all employees in Engineering", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("Engineering"));
        assert_eq!(docs[0].metadata["source"], json!("intent"));
        assert_eq!(docs[0].metadata["template_id"], json!("employees_by_department"));
        assert_eq!(docs[0].metadata["datasource"], json!("postgres"));
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_before_execution() {
        let (retriever, calls) = build_retriever(vec![]).await;
        let err = retriever
            .get_relevant_context("show me everyone", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingParameter { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_match_below_threshold_returns_no_match_metadata() {
        let mut store = TemplateStore::new();
        store.load(vec![sql_template()], &FixedProvider).await.unwrap();
        let client = Arc::new(StubClient { calls: Arc::new(AtomicUsize::new(0)), rows: vec![] });
        let breaker = Arc::new(CircuitBreaker::new("employees-sql", CircuitBreakerConfig::default()));
        let retriever = IntentRetriever::new(
            "employees-sql",
            "postgres",
            store,
            0.99,
            client,
            Box::new(GenericDomainAdapter),
            Arc::new(FixedProvider),
            breaker,
            crate::retry::RetryConfig::default(),
            Duration::from_secs(1),
        );

        let docs = retriever
            .get_relevant_context("totally unrelated query", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata[super::super::base::NO_MATCH_METADATA_KEY], json!(true));
    }
}
