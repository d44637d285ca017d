//! Template matching shared by every retriever: the vector collection of
//! a retriever's templates and the confidence-thresholded top-K search
//! over it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::providers::{cosine_similarity, EmbeddingProvider};
use crate::template::{Template, TemplateMatch};
use crate::types::Document;

/// Contract every retriever (intent or composite) implements: given a
/// query and capability-projected kwargs, return zero or more scored
/// documents. `kwargs` carries whatever
/// [`crate::capability::CapabilityModel::build_retriever_kwargs`]
/// projected from the request context.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn get_relevant_context(
        &self,
        query: &str,
        kwargs: &HashMap<String, Value>,
    ) -> Result<Vec<Document>>;

    fn name(&self) -> &str;

    /// Search this retriever's own template store for up to
    /// `max_templates` matches clearing `confidence_threshold`, without
    /// executing anything. The composite retriever calls this on every
    /// child concurrently during routing; the default (no template
    /// store of its own) returns no matches rather than failing, so a
    /// tool-backed or other non-template retriever can still be used as
    /// a composite child.
    fn search_templates(
        &self,
        _query_embedding: &[f32],
        _confidence_threshold: f64,
        _max_templates: usize,
    ) -> Vec<TemplateMatch> {
        Vec::new()
    }
}

/// One template plus its precomputed embedding, held by a [`TemplateStore`].
struct StoredTemplate {
    template: Template,
    embedding: Vec<f32>,
}

/// A retriever's owned vector collection of templates: one embedding per
/// template's concatenated `nl_examples` (plus description). Immutable
/// after [`TemplateStore::load`]; a reload swaps the whole store.
#[derive(Default)]
pub struct TemplateStore {
    templates: Vec<StoredTemplate>,
}

impl TemplateStore {
    #[must_use]
    pub fn new() -> Self {
        Self { templates: Vec::new() }
    }

    /// Embed every template's `embedding_text()` once via `provider` and
    /// store it. Templates failing `validate_declared_parameters` are
    /// rejected at this point rather than at match time.
    pub async fn load(&mut self, templates: Vec<Template>, provider: &dyn EmbeddingProvider) -> Result<()> {
        let mut stored = Vec::with_capacity(templates.len());
        for template in templates {
            template.validate_declared_parameters()?;
            let embedding = provider.embed_text(&template.embedding_text()).await?;
            stored.push(StoredTemplate { template, embedding });
        }
        self.templates = stored;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    #[must_use]
    pub fn template(&self, template_id: &str) -> Option<&Template> {
        self.templates
            .iter()
            .find(|t| t.template.id == template_id)
            .map(|t| &t.template)
    }

    /// Score every stored template against `query_embedding` and return
    /// matches with `embedding_score >= confidence_threshold`, ordered by
    /// descending score with ties broken by ascending (lexicographic)
    /// template id.
    #[must_use]
    pub fn match_query(
        &self,
        source_adapter: &str,
        query_embedding: &[f32],
        confidence_threshold: f64,
    ) -> Vec<TemplateMatch> {
        let mut matches: Vec<TemplateMatch> = self
            .templates
            .iter()
            .map(|stored| {
                let score = f64::from(cosine_similarity(query_embedding, &stored.embedding));
                TemplateMatch {
                    template_id: stored.template.id.clone(),
                    source_adapter: source_adapter.to_string(),
                    template_data: stored.template.clone(),
                    embedding_text: stored.template.embedding_text(),
                    embedding_score: score,
                    rerank_score: None,
                    string_similarity_score: None,
                    combined_score: None,
                    scoring_details: HashMap::new(),
                }
            })
            .filter(|m| m.embedding_score >= confidence_threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.embedding_score
                .partial_cmp(&a.embedding_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        matches
    }

    /// The single best match, or `None` if nothing cleared the threshold
    /// (the retriever's `TemplateMatchBelowThreshold` case — represented
    /// as an empty result, never an error).
    #[must_use]
    pub fn best_match(
        &self,
        source_adapter: &str,
        query_embedding: &[f32],
        confidence_threshold: f64,
    ) -> Option<TemplateMatch> {
        self.match_query(source_adapter, query_embedding, confidence_threshold)
            .into_iter()
            .next()
    }
}

/// Metadata key set on the `metadata` map of a result produced when no
/// template cleared the confidence threshold.
pub const NO_MATCH_METADATA_KEY: &str = "no_match";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{QueryBody, ResultFormat};
    use async_trait::async_trait;

    struct FixedProvider;

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            // Deterministic stand-in embedding: encode the first
            // character so near-identical inputs produce similar vectors.
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

    fn template(id: &str, description: &str) -> Template {
        Template {
            id: id.to_string(),
            version: "1".to_string(),
            description: description.to_string(),
            nl_examples: vec![description.to_string()],
            semantic_tags: Vec::new(),
            parameters: Vec::new(),
            body: QueryBody::Sql { sql: "SELECT 1".to_string() },
            result_format: ResultFormat::default(),
            display_fields: Vec::new(),
            tags: Vec::new(),
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn match_query_filters_below_threshold_and_sorts() {
        let mut store = TemplateStore::new();
        store
            .load(vec![template("b-template", "Apple"), template("a-template", "Apple")], &FixedProvider)
            .await
            .unwrap();

        let query_embedding = FixedProvider.embed_text("Apple").await.unwrap();
        let matches = store.match_query("intent-sql-sqlite", &query_embedding, 0.0);

        assert_eq!(matches.len(), 2);
        // Equal scores -> tie-break by ascending template id.
        assert_eq!(matches[0].template_id, "a-template");
        assert_eq!(matches[1].template_id, "b-template");
    }

    #[tokio::test]
    async fn best_match_is_none_when_nothing_clears_threshold() {
        let mut store = TemplateStore::new();
        store.load(vec![template("t1", "Apple")], &FixedProvider).await.unwrap();
        let query_embedding = vec![0.0, 0.0, 1.0];
        assert!(store.best_match("intent-sql-sqlite", &query_embedding, 0.99).is_none());
    }

    #[test]
    fn empty_store_reports_empty() {
        let store = TemplateStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }
}
