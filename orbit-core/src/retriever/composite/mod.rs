//! Composite retriever: cross-source template search over a set of child
//! intent adapters, multi-stage scoring, and delegated execution to the
//! single winning child.

pub mod scoring;
pub mod string_similarity;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::providers::{EmbeddingProvider, Reranker};
use crate::retriever::Retriever;
use crate::template::TemplateMatch;
use crate::types::Document;

pub use scoring::{ScoringConfig, ScoringWeights, TieBreaker};
pub use string_similarity::SimilarityAlgorithm;

/// Composite-level configuration, distinct from any one child's.
#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub confidence_threshold: f64,
    pub max_templates_per_source: usize,
    pub search_timeout: Duration,
    pub scoring: ScoringConfig,
    pub similarity_algorithm: SimilarityAlgorithm,
    pub cache_rerank_results: bool,
    pub cache_ttl: Duration,
    pub multi_stage_enabled: bool,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: crate::constants::defaults::DEFAULT_CONFIDENCE_THRESHOLD,
            max_templates_per_source: 5,
            search_timeout: Duration::from_secs(5),
            scoring: ScoringConfig::default(),
            similarity_algorithm: SimilarityAlgorithm::default(),
            cache_rerank_results: true,
            cache_ttl: Duration::from_secs(300),
            multi_stage_enabled: true,
        }
    }
}

/// The ranked candidate set and would-be decision from a dry-run
/// routing pass, for debugging and tests.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub candidates: Vec<TemplateMatch>,
    pub winner: Option<TemplateMatch>,
}

/// Per-child template counts plus the active configuration, for
/// operational visibility.
#[derive(Debug, Clone)]
pub struct RoutingStatistics {
    pub templates_per_child: HashMap<String, usize>,
    pub config: CompositeConfigSummary,
}

#[derive(Debug, Clone)]
pub struct CompositeConfigSummary {
    pub confidence_threshold: f64,
    pub max_templates_per_source: usize,
    pub multi_stage_enabled: bool,
}

type RerankCacheKey = (u64, String);

/// Federated retriever over a set of child intent adapters, resolved at
/// construction time (typically via
/// [`crate::registry::AdapterRegistry::get`]).
pub struct CompositeRetriever {
    name: String,
    children: Vec<Arc<dyn Retriever>>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    config: CompositeConfig,
    rerank_cache: Mutex<HashMap<RerankCacheKey, (f64, Instant)>>,
}

impl CompositeRetriever {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        children: Vec<Arc<dyn Retriever>>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        config: CompositeConfig,
    ) -> Self {
        Self {
            name: name.into(),
            children,
            embedding_provider,
            reranker,
            config,
            rerank_cache: Mutex::new(HashMap::new()),
        }
    }

    fn query_hash(query: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        query.hash(&mut hasher);
        hasher.finish()
    }

    async fn search_children(&self, query_embedding: &[f32]) -> Vec<TemplateMatch> {
        let futures = self.children.iter().map(|child| {
            let embedding = query_embedding.to_vec();
            let threshold = self.config.confidence_threshold;
            let max = self.config.max_templates_per_source;
            let search_timeout = self.config.search_timeout;
            async move {
                match timeout(search_timeout, async { child.search_templates(&embedding, threshold, max) }).await {
                    Ok(matches) => matches,
                    Err(_) => {
                        warn!(child = child.name(), "composite child search timed out");
                        Vec::new()
                    }
                }
            }
        });
        futures::future::join_all(futures).await.into_iter().flatten().collect()
    }

    async fn apply_rerank_stage(&self, query: &str, candidates: &mut [TemplateMatch]) {
        let Some(reranker) = &self.reranker else {
            return;
        };

        let mut ranked: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .map(|(i, m)| (i, m.embedding_score))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_indices: Vec<usize> = ranked
            .into_iter()
            .take(self.config.scoring.top_candidates)
            .map(|(i, _)| i)
            .collect();

        let query_hash = Self::query_hash(query);
        for i in top_indices {
            let template_id = candidates[i].template_id.clone();
            let cache_key = (query_hash, template_id.clone());

            if self.config.cache_rerank_results {
                let cached = {
                    let cache = self.rerank_cache.lock();
                    cache.get(&cache_key).copied()
                };
                if let Some((score, cached_at)) = cached {
                    if cached_at.elapsed() < self.config.cache_ttl {
                        candidates[i].rerank_score = Some(score);
                        continue;
                    }
                }
            }

            let candidate_text = format!(
                "{}\n{}",
                candidates[i].template_data.description,
                candidates[i].template_data.nl_examples.join("\n")
            );
            match reranker.score(query, &candidate_text).await {
                Ok(score) => {
                    candidates[i].rerank_score = Some(score);
                    if self.config.cache_rerank_results {
                        self.rerank_cache.lock().insert(cache_key, (score, Instant::now()));
                    }
                }
                Err(err) => {
                    warn!(template_id = %template_id, error = %err, "reranker call failed, skipping rerank for this candidate");
                }
            }
        }
    }

    fn apply_string_similarity_stage(&self, query: &str, candidates: &mut [TemplateMatch]) {
        for candidate in candidates {
            let mut fields = candidate.template_data.nl_examples.clone();
            fields.push(candidate.template_data.description.clone());
            let score = string_similarity::calculate_best_text_similarity(query, &fields, self.config.similarity_algorithm);
            candidate.string_similarity_score = Some(score);
        }
    }

    async fn route(&self, query: &str) -> Result<RoutingDecision> {
        let query_embedding = self.embedding_provider.embed_text(query).await?;
        let mut candidates = self.search_children(&query_embedding).await;

        if self.config.multi_stage_enabled && !candidates.is_empty() {
            self.apply_rerank_stage(query, &mut candidates).await;
            self.apply_string_similarity_stage(query, &mut candidates);
            scoring::combine_scores(&mut candidates, &self.config.scoring);
        }

        let winner = scoring::select_winner(&candidates, self.config.confidence_threshold, self.config.scoring.tie_breaker)
            .cloned();

        Ok(RoutingDecision { candidates, winner })
    }

    /// Debug entry point: run routing without executing the winner.
    pub async fn test_routing(&self, query: &str) -> Result<RoutingDecision> {
        self.route(query).await
    }

    /// Debug entry point: per-child template counts and the active
    /// configuration.
    #[must_use]
    pub fn get_routing_statistics(&self) -> RoutingStatistics {
        let templates_per_child = self
            .children
            .iter()
            .map(|child| {
                let count = child.search_templates(&[], f64::MIN, usize::MAX).len();
                (child.name().to_string(), count)
            })
            .collect();

        RoutingStatistics {
            templates_per_child,
            config: CompositeConfigSummary {
                confidence_threshold: self.config.confidence_threshold,
                max_templates_per_source: self.config.max_templates_per_source,
                multi_stage_enabled: self.config.multi_stage_enabled,
            },
        }
    }
}

#[async_trait]
impl Retriever for CompositeRetriever {
    #[instrument(skip(self, kwargs), fields(composite = %self.name))]
    async fn get_relevant_context(&self, query: &str, kwargs: &HashMap<String, Value>) -> Result<Vec<Document>> {
        let decision = self.route(query).await?;

        let Some(winner) = decision.winner else {
            let mut metadata = HashMap::new();
            metadata.insert(
                crate::retriever::base::NO_MATCH_METADATA_KEY.to_string(),
                Value::Bool(true),
            );
            return Ok(vec![Document {
                content: String::new(),
                metadata,
                confidence: 0.0,
            }]);
        };

        let child = self
            .children
            .iter()
            .find(|c| c.name() == winner.source_adapter)
            .expect("winning candidate's source_adapter must name a known child");

        let mut documents = child.get_relevant_context(query, kwargs).await?;

        let mut routing_metadata = HashMap::new();
        routing_metadata.insert("selected_adapter".to_string(), Value::String(winner.source_adapter.clone()));
        routing_metadata.insert("template_id".to_string(), Value::String(winner.template_id.clone()));
        routing_metadata.insert("similarity_score".to_string(), Value::from(winner.embedding_score));
        routing_metadata.insert("adapters_searched".to_string(), Value::from(self.children.len()));
        routing_metadata.insert("total_matches_found".to_string(), Value::from(decision.candidates.len()));

        for doc in &mut documents {
            doc.metadata.insert("composite_routing".to_string(), Value::Object(
                routing_metadata.clone().into_iter().collect(),
            ));
            if self.config.multi_stage_enabled {
                let mut scoring_metadata = HashMap::new();
                scoring_metadata.insert("embedding".to_string(), Value::from(winner.embedding_score));
                if let Some(r) = winner.rerank_score {
                    scoring_metadata.insert("rerank".to_string(), Value::from(r));
                }
                if let Some(s) = winner.string_similarity_score {
                    scoring_metadata.insert("string".to_string(), Value::from(s));
                }
                scoring_metadata.insert("weights".to_string(), Value::from(format!(
                    "e={:.2},r={:.2},s={:.2}",
                    self.config.scoring.weights.embedding, self.config.scoring.weights.rerank, self.config.scoring.weights.string
                )));
                doc.metadata.insert("multistage_scoring".to_string(), Value::Object(
                    scoring_metadata.into_iter().collect(),
                ));
            }
        }

        Ok(documents)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Parameter, ParameterType, QueryBody, ResultFormat, Template};
    use async_trait::async_trait;

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

    struct StubChild {
        name: String,
        matches: Vec<TemplateMatch>,
        docs: Vec<Document>,
    }

    #[async_trait]
    impl Retriever for StubChild {
        async fn get_relevant_context(&self, _query: &str, _kwargs: &HashMap<String, Value>) -> Result<Vec<Document>> {
            Ok(self.docs.clone())
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn search_templates(&self, _query_embedding: &[f32], _confidence_threshold: f64, max_templates: usize) -> Vec<TemplateMatch> {
            self.matches.iter().take(max_templates).cloned().collect()
        }
    }

    fn template_match(source: &str, id: &str, score: f64) -> TemplateMatch {
        TemplateMatch {
            template_id: id.to_string(),
            source_adapter: source.to_string(),
            template_data: Template {
                id: id.to_string(),
                version: "1".to_string(),
                description: "apple template".to_string(),
                nl_examples: vec!["apple template".to_string()],
                semantic_tags: Vec::new(),
                parameters: Vec::<Parameter>::new(),
                body: QueryBody::Sql { sql: "SELECT 1".to_string() },
                result_format: ResultFormat::default(),
                display_fields: Vec::new(),
                tags: Vec::new(),
                timeout_secs: None,
            },
            embedding_text: "apple template".to_string(),
            embedding_score: score,
            rerank_score: None,
            string_similarity_score: None,
            combined_score: None,
            scoring_details: HashMap::new(),
        }
    }

    fn doc(content: &str) -> Document {
        Document { content: content.to_string(), metadata: HashMap::new(), confidence: 1.0 }
    }

    #[tokio::test]
    async fn routes_to_highest_scoring_child_and_enriches_metadata() {
        let weak = Arc::new(StubChild {
            name: "intent-sql-weak".to_string(),
            matches: vec![template_match("intent-sql-weak", "t-weak", 0.6)],
            docs: vec![doc("weak")],
        });
        let strong = Arc::new(StubChild {
            name: "intent-sql-strong".to_string(),
            matches: vec![template_match("intent-sql-strong", "t-strong", 0.95)],
            docs: vec![doc("strong")],
        });

        let composite = CompositeRetriever::new(
            "composite-sql",
            vec![weak, strong],
            Arc::new(FixedProvider),
            None,
            CompositeConfig { confidence_threshold: 0.5, ..CompositeConfig::default() },
        );

        let docs = composite.get_relevant_context("apple", &HashMap::new()).await.unwrap();
        assert_eq!(docs[0].content, "strong");
        let routing = &docs[0].metadata["composite_routing"];
        assert_eq!(routing["selected_adapter"], "intent-sql-strong");
        assert_eq!(routing["adapters_searched"], 2);
    }

    #[tokio::test]
    async fn test_routing_reports_no_winner_below_threshold() {
        let child = Arc::new(StubChild {
            name: "intent-sql-weak".to_string(),
            matches: vec![template_match("intent-sql-weak", "t-weak", 0.2)],
            docs: vec![doc("weak")],
        });
        let composite = CompositeRetriever::new(
            "composite-sql",
            vec![child],
            Arc::new(FixedProvider),
            None,
            CompositeConfig { confidence_threshold: 0.9, ..CompositeConfig::default() },
        );
        let decision = composite.test_routing("apple").await.unwrap();
        assert!(decision.winner.is_none());
        assert_eq!(decision.candidates.len(), 1);
    }

    #[tokio::test]
    async fn routing_statistics_reports_per_child_template_counts() {
        let child = Arc::new(StubChild {
            name: "intent-sql-weak".to_string(),
            matches: vec![template_match("intent-sql-weak", "t-weak", 0.2), template_match("intent-sql-weak", "t2", 0.3)],
            docs: vec![],
        });
        let composite = CompositeRetriever::new("composite-sql", vec![child], Arc::new(FixedProvider), None, CompositeConfig::default());
        let stats = composite.get_routing_statistics();
        assert_eq!(stats.templates_per_child["intent-sql-weak"], 2);
    }
}
