//! Ordered retrieval pipeline: capability resolution, follow-up cache
//! check, context retrieval, and post-retrieval cache store. Each step
//! implements `should_execute`/`process` over a shared
//! [`ProcessingContext`]; downstream inference is an external
//! collaborator that only ever sees `context.formatted_context`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::cache::types::{CacheKey, CachedResult, ResultMetadata};
use crate::cache::{FollowupCache, FollowupCacheConfig};
use crate::capability::CapabilityModel;
use crate::error::Result;
use crate::providers::{EmbeddingProvider, FollowupClassifier};
use crate::retriever::Retriever;
use crate::types::{Document, ProcessingContext};

/// One resolved adapter: the capability policy the pipeline gates on,
/// plus the retriever to call when capabilities say to retrieve. A
/// passthrough adapter (no retrieval) resolves with `retriever: None`.
#[derive(Clone)]
pub struct ResolvedAdapter {
    pub capability_model: CapabilityModel,
    pub retriever: Option<Arc<dyn Retriever>>,
}

/// The sole external-collaborator seam this module needs: resolving an
/// adapter name to its capability model and retriever. A concrete
/// implementation wraps [`crate::registry::AdapterRegistry`]; this trait
/// keeps the pipeline from depending on how an adapter was constructed.
#[async_trait]
pub trait AdapterResolver: Send + Sync {
    async fn resolve(&self, adapter_name: &str) -> Result<ResolvedAdapter>;
}

/// One ordered pipeline step.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn should_execute(&self, context: &ProcessingContext) -> bool;
    async fn process(&self, context: ProcessingContext) -> Result<ProcessingContext>;
    fn name(&self) -> &str;
}

/// Populates `context.capabilities` from the adapter's resolved
/// capability model. Runs once per request, before any other step reads
/// `context.capabilities`.
pub struct CapabilityResolutionStep {
    resolver: Arc<dyn AdapterResolver>,
}

impl CapabilityResolutionStep {
    #[must_use]
    pub fn new(resolver: Arc<dyn AdapterResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl PipelineStep for CapabilityResolutionStep {
    fn should_execute(&self, context: &ProcessingContext) -> bool {
        context.capabilities.is_none()
    }

    async fn process(&self, mut context: ProcessingContext) -> Result<ProcessingContext> {
        let resolved = self.resolver.resolve(&context.adapter_name).await?;
        context.capabilities = Some(resolved.capability_model.capabilities.clone());
        Ok(context)
    }

    fn name(&self) -> &str {
        "capability_resolution"
    }
}

/// Checks the follow-up cache; on an accepted follow-up, formats the
/// cached result as context and leaves `context.should_retrieve` unset so
/// [`ContextRetrievalStep`] is skipped.
pub struct CacheCheckStep {
    cache: FollowupCache,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    classifier: Option<Arc<dyn FollowupClassifier>>,
}

impl CacheCheckStep {
    #[must_use]
    pub fn new(
        cache: FollowupCache,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        classifier: Option<Arc<dyn FollowupClassifier>>,
    ) -> Self {
        Self {
            cache,
            embedding_provider,
            classifier,
        }
    }
}

#[async_trait]
impl PipelineStep for CacheCheckStep {
    fn should_execute(&self, context: &ProcessingContext) -> bool {
        context.session_id.is_some()
            && context
                .capabilities
                .as_ref()
                .is_some_and(|c| c.supports_threading)
    }

    #[instrument(skip(self, context), fields(adapter = %context.adapter_name))]
    async fn process(&self, mut context: ProcessingContext) -> Result<ProcessingContext> {
        let Some(session_id) = context.session_id.clone() else {
            return Ok(context);
        };
        let key = CacheKey::new(session_id, context.adapter_name.clone());
        let query_embedding = self.embedding_provider.embed_text(&context.message).await.ok();

        let decision = self
            .cache
            .evaluate(
                &key,
                &context.message,
                query_embedding.as_deref(),
                context.bypass_cache,
                self.classifier.as_deref(),
            )
            .await?;

        context.is_followup = decision.cache_hit;
        context.followup_confidence = decision.followup_confidence;
        context.cache_refresh_requested = decision.cache_refresh;
        context.cache_applicability_reason = decision.cache_applicability_reason;

        if decision.cache_hit {
            if let Some(embedding) = query_embedding {
                if let Some(cached) = self.cache.accept_followup(&key, embedding).await {
                    context.formatted_context = Some(render_cached_result(&cached));
                }
            }
        }
        Ok(context)
    }

    fn name(&self) -> &str {
        "cache_check"
    }
}

fn render_cached_result(cached: &CachedResult) -> String {
    cached
        .results
        .iter()
        .map(|row| row.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Invokes the adapter's retriever when its capabilities say to, formats
/// the returned documents, and trims to `context_max_tokens` by dropping
/// the lowest-confidence documents first.
pub struct ContextRetrievalStep {
    resolver: Arc<dyn AdapterResolver>,
}

impl ContextRetrievalStep {
    #[must_use]
    pub fn new(resolver: Arc<dyn AdapterResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl PipelineStep for ContextRetrievalStep {
    fn should_execute(&self, context: &ProcessingContext) -> bool {
        if context.formatted_context.is_some() {
            // Cache check already produced a formatted context this request.
            return false;
        }
        context
            .capabilities
            .as_ref()
            .is_some_and(|caps| CapabilityModel::new(caps.clone()).should_retrieve(context))
    }

    #[instrument(skip(self, context), fields(adapter = %context.adapter_name))]
    async fn process(&self, mut context: ProcessingContext) -> Result<ProcessingContext> {
        context.should_retrieve = true;
        let resolved = self.resolver.resolve(&context.adapter_name).await?;
        let Some(retriever) = resolved.retriever else {
            return Ok(context);
        };

        let kwargs = resolved
            .capability_model
            .build_retriever_kwargs(&context, &context.adapter_name)?;
        let mut docs = retriever.get_relevant_context(&context.message, &kwargs).await?;

        trim_to_token_budget(&mut docs, resolved.capability_model.capabilities.context_max_tokens);

        context.formatted_context = Some(render_documents(&docs));
        context.retrieved_docs = docs;
        Ok(context)
    }

    fn name(&self) -> &str {
        "context_retrieval"
    }
}

/// Drop the lowest-confidence document repeatedly until the total
/// estimated token count is within `max_tokens`, or nothing is left.
fn trim_to_token_budget(docs: &mut Vec<Document>, max_tokens: Option<usize>) {
    let Some(max_tokens) = max_tokens else {
        return;
    };
    let mut total: usize = docs.iter().map(Document::estimated_tokens).sum();
    while total > max_tokens && !docs.is_empty() {
        let Some((idx, _)) = docs
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.confidence.partial_cmp(&b.1.confidence).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };
        total -= docs[idx].estimated_tokens();
        docs.remove(idx);
    }
}

fn render_documents(docs: &[Document]) -> String {
    docs.iter().map(|d| d.content.as_str()).collect::<Vec<_>>().join("\n\n")
}

/// Stores the retrieval result into the follow-up cache when the
/// adapter's capabilities allow threading and the result is fresh (not
/// itself served from the cache).
pub struct PostRetrievalCacheStoreStep {
    cache: FollowupCache,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    entry_ttl: Duration,
    recent_followup_capacity: usize,
}

impl PostRetrievalCacheStoreStep {
    #[must_use]
    pub fn new(cache: FollowupCache, embedding_provider: Arc<dyn EmbeddingProvider>, config: &FollowupCacheConfig) -> Self {
        Self {
            cache,
            embedding_provider,
            entry_ttl: config.entry_ttl,
            recent_followup_capacity: config.recent_followup_capacity,
        }
    }
}

#[async_trait]
impl PipelineStep for PostRetrievalCacheStoreStep {
    fn should_execute(&self, context: &ProcessingContext) -> bool {
        context.should_retrieve
            && !context.is_followup
            && context.session_id.is_some()
            && context
                .capabilities
                .as_ref()
                .is_some_and(|c| c.supports_threading)
    }

    #[instrument(skip(self, context), fields(adapter = %context.adapter_name))]
    async fn process(&self, context: ProcessingContext) -> Result<ProcessingContext> {
        let Some(session_id) = context.session_id.clone() else {
            return Ok(context);
        };
        if context.retrieved_docs.is_empty() {
            return Ok(context);
        }

        let embedding = self.embedding_provider.embed_text(&context.message).await?;
        let results: Vec<Value> = context
            .retrieved_docs
            .iter()
            .map(|d| serde_json::json!({"content": d.content, "confidence": d.confidence}))
            .collect();
        let result_columns: Vec<String> = context
            .retrieved_docs
            .first()
            .map(|d| d.metadata.keys().cloned().collect())
            .unwrap_or_default();

        let cached = CachedResult::new(
            context.message.clone(),
            embedding,
            context.message.clone(),
            results,
            result_columns,
            ResultMetadata {
                row_count: context.retrieved_docs.len(),
                ..ResultMetadata::default()
            },
            self.entry_ttl,
            self.recent_followup_capacity,
        );

        let key = CacheKey::new(session_id, context.adapter_name.clone());
        // Oversized results degrade to "not cached" rather than failing
        // the request; the response already has its formatted context.
        let _ = self.cache.store(key, cached).await;
        Ok(context)
    }

    fn name(&self) -> &str {
        "post_retrieval_cache_store"
    }
}

/// Runs the four pipeline steps in order against a fresh
/// [`ProcessingContext`], skipping any step whose `should_execute`
/// returns `false`.
pub struct RetrievalPipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl RetrievalPipeline {
    #[must_use]
    pub fn new(steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        Self { steps }
    }

    /// Build the standard four-step pipeline from its collaborators.
    #[must_use]
    pub fn standard(
        resolver: Arc<dyn AdapterResolver>,
        cache: FollowupCache,
        cache_config: &FollowupCacheConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        classifier: Option<Arc<dyn FollowupClassifier>>,
    ) -> Self {
        Self::new(vec![
            Arc::new(CapabilityResolutionStep::new(Arc::clone(&resolver))),
            Arc::new(CacheCheckStep::new(cache.clone(), Arc::clone(&embedding_provider), classifier)),
            Arc::new(ContextRetrievalStep::new(Arc::clone(&resolver))),
            Arc::new(PostRetrievalCacheStoreStep::new(cache, embedding_provider, cache_config)),
        ])
    }

    #[instrument(skip(self, context), fields(adapter = %context.adapter_name))]
    pub async fn run(&self, mut context: ProcessingContext) -> Result<ProcessingContext> {
        for step in &self.steps {
            if step.should_execute(&context) {
                context = step.process(context).await?;
            }
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdapterCapabilities, RetrievalBehavior};
    use async_trait::async_trait;
    use std::collections::HashMap;
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

    struct StubRetriever {
        calls: Arc<AtomicUsize>,
        docs: Vec<Document>,
    }

    #[async_trait]
    impl Retriever for StubRetriever {
        async fn get_relevant_context(&self, _query: &str, _kwargs: &HashMap<String, Value>) -> Result<Vec<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.docs.clone())
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    struct StubResolver {
        capabilities: AdapterCapabilities,
        retriever: Option<Arc<dyn Retriever>>,
    }

    #[async_trait]
    impl AdapterResolver for StubResolver {
        async fn resolve(&self, _adapter_name: &str) -> Result<ResolvedAdapter> {
            Ok(ResolvedAdapter {
                capability_model: CapabilityModel::new(self.capabilities.clone()),
                retriever: self.retriever.clone(),
            })
        }
    }

    fn doc(content: &str, confidence: f64) -> Document {
        Document {
            content: content.to_string(),
            metadata: HashMap::new(),
            confidence,
        }
    }

    #[tokio::test]
    async fn capability_none_skips_context_retrieval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retriever: Arc<dyn Retriever> = Arc::new(StubRetriever { calls: calls.clone(), docs: vec![doc("x", 1.0)] });
        let resolver: Arc<dyn AdapterResolver> = Arc::new(StubResolver {
            capabilities: AdapterCapabilities::none(),
            retriever: Some(retriever),
        });

        let pipeline = RetrievalPipeline::new(vec![
            Arc::new(CapabilityResolutionStep::new(resolver.clone())),
            Arc::new(ContextRetrievalStep::new(resolver)),
        ]);

        let context = ProcessingContext::new("hello", "chat");
        let result = pipeline.run(context).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.formatted_context.is_none());
    }

    #[tokio::test]
    async fn always_retrieval_calls_retriever_and_formats_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retriever: Arc<dyn Retriever> = Arc::new(StubRetriever {
            calls: calls.clone(),
            docs: vec![doc("alpha", 0.9), doc("beta", 0.5)],
        });
        let resolver: Arc<dyn AdapterResolver> = Arc::new(StubResolver {
            capabilities: AdapterCapabilities {
                retrieval_behavior: RetrievalBehavior::Always,
                ..AdapterCapabilities::none()
            },
            retriever: Some(retriever),
        });

        let pipeline = RetrievalPipeline::new(vec![
            Arc::new(CapabilityResolutionStep::new(resolver.clone())),
            Arc::new(ContextRetrievalStep::new(resolver)),
        ]);

        let context = ProcessingContext::new("find things", "qa-sql");
        let result = pipeline.run(context).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let formatted = result.formatted_context.unwrap();
        assert!(formatted.contains("alpha"));
        assert!(formatted.contains("beta"));
    }

    #[tokio::test]
    async fn token_budget_trims_lowest_confidence_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        // "alpha" (5 chars -> 2 tokens) + "beta beta beta" (14 chars -> 4
        // tokens) = 6 tokens; budget of 3 must drop the lower-confidence
        // "beta beta beta" entirely.
        let retriever: Arc<dyn Retriever> = Arc::new(StubRetriever {
            calls: calls.clone(),
            docs: vec![doc("alpha", 0.9), doc("beta beta beta", 0.1)],
        });
        let resolver: Arc<dyn AdapterResolver> = Arc::new(StubResolver {
            capabilities: AdapterCapabilities {
                retrieval_behavior: RetrievalBehavior::Always,
                context_max_tokens: Some(3),
                ..AdapterCapabilities::none()
            },
            retriever: Some(retriever),
        });

        let pipeline = RetrievalPipeline::new(vec![
            Arc::new(CapabilityResolutionStep::new(resolver.clone())),
            Arc::new(ContextRetrievalStep::new(resolver)),
        ]);

        let context = ProcessingContext::new("find things", "qa-sql");
        let result = pipeline.run(context).await.unwrap();

        assert_eq!(result.retrieved_docs.len(), 1);
        assert_eq!(result.retrieved_docs[0].content, "alpha");
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_context_retrieval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retriever: Arc<dyn Retriever> = Arc::new(StubRetriever { calls: calls.clone(), docs: vec![doc("fresh", 1.0)] });
        let capabilities = AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Always,
            supports_threading: true,
            ..AdapterCapabilities::none()
        };
        let resolver: Arc<dyn AdapterResolver> = Arc::new(StubResolver {
            capabilities,
            retriever: Some(retriever),
        });

        let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(FixedProvider);
        // Isolate the test from the classifier's heuristic wording and
        // from the empty recent-followup ring contributing zero: weight
        // only on original-query similarity, which is 1.0 for an
        // identical query string under the deterministic test provider.
        let cache = FollowupCache::new(FollowupCacheConfig {
            blend_weights: crate::cache::BlendWeights {
                original_similarity: 1.0,
                recent_similarity: 0.0,
                classifier: 0.0,
            },
            ..FollowupCacheConfig::default()
        });
        let key = CacheKey::new("session-1", "qa-sql");
        let cached = CachedResult::new(
            "original query",
            FixedProvider.embed_text("original query").await.unwrap(),
            "SELECT 1",
            vec![serde_json::json!({"content": "cached row"})],
            vec!["original".to_string(), "query".to_string()],
            ResultMetadata::default(),
            Duration::from_secs(900),
            5,
        );
        cache.store(key, cached).await.unwrap();

        let pipeline = RetrievalPipeline::new(vec![
            Arc::new(CapabilityResolutionStep::new(resolver.clone())),
            Arc::new(CacheCheckStep::new(cache, embedding_provider, None)),
            Arc::new(ContextRetrievalStep::new(resolver)),
        ]);

        let mut context = ProcessingContext::new("original query", "qa-sql");
        context.session_id = Some("session-1".to_string());
        let result = pipeline.run(context).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.is_followup);
        assert!(result.formatted_context.unwrap().contains("cached row"));
    }
}
