//! External collaborator traits: embedding, reranking, and follow-up
//! classification. Concrete implementations (OpenAI, local models, a
//! trained follow-up classifier) live outside this crate — these traits
//! are the seam the retriever, composite scoring, and follow-up cache
//! call through.

use async_trait::async_trait;

use crate::error::Result;

/// The result of embedding a single piece of text.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub token_count: Option<usize>,
    pub model: String,
}

impl EmbeddingResult {
    #[must_use]
    pub fn new(embedding: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            embedding,
            token_count: None,
            model: model.into(),
        }
    }
}

/// A single consistent embedding provider used across all templates
/// owned by a retriever, and shared, where practical, with the
/// composite retriever and follow-up cache.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single string.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of strings. Default implementation loops
    /// `embed_text`; providers with a native batch API should override.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    /// Cosine similarity between two texts' embeddings, normalized to
    /// `[0, 1]` (see [`cosine_similarity`]).
    async fn similarity(&self, text1: &str, text2: &str) -> Result<f32> {
        let e1 = self.embed_text(text1).await?;
        let e2 = self.embed_text(text2).await?;
        Ok(cosine_similarity(&e1, &e2))
    }

    /// Dimensionality of vectors this provider returns.
    fn embedding_dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Whether the provider currently answers calls. Default probes with
    /// a trivial embed; providers with a cheaper health check should
    /// override.
    async fn is_available(&self) -> bool {
        self.embed_text("health_check").await.is_ok()
    }
}

/// Cosine similarity normalized from `[-1, 1]` to `[0, 1]` so it composes
/// directly with the other `[0, 1]`-scaled signals in composite scoring
/// and follow-up confidence blending.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }
    let similarity = dot_product / (magnitude_a * magnitude_b);
    (similarity + 1.0) / 2.0
}

/// A reranker scores `(query, candidate description)` pairs for
/// composite Stage 2. Results are cached by
/// `(query_hash, template_id)` by [`crate::retriever::composite`], not
/// by the provider itself.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score a single candidate against the query; higher is more
    /// relevant. Implementations should return a value in `[0, 1]`.
    async fn score(&self, query: &str, candidate: &str) -> Result<f64>;

    fn model_name(&self) -> &str;
}

/// Lightweight follow-up probability scorer used as one signal in follow-
/// up confidence blending.
#[async_trait]
pub trait FollowupClassifier: Send + Sync {
    /// Probability in `[0, 1]` that `query` is a follow-up to
    /// `previous_query`.
    async fn classify(&self, previous_query: &str, query: &str) -> Result<f64>;
}

/// Deterministic default classifier: combines a short-query bias (follow-
/// ups tend to be terse) with overlap of pronoun/ellipsis cues. Used when
/// no ML-backed classifier is configured, so follow-up confidence
/// blending always has a well-defined signal to draw on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicFollowupClassifier;

const FOLLOWUP_CUES: &[&str] = &[
    "it", "that", "those", "them", "these", "what about", "and", "also",
];

#[async_trait]
impl FollowupClassifier for HeuristicFollowupClassifier {
    async fn classify(&self, _previous_query: &str, query: &str) -> Result<f64> {
        let lower = query.to_lowercase();
        let word_count = lower.split_whitespace().count();
        let mut score: f64 = if word_count <= 6 { 0.65 } else { 0.40 };

        for cue in FOLLOWUP_CUES {
            if lower
                .split_whitespace()
                .any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *cue)
                || lower.starts_with(cue)
            {
                score += 0.15;
                break;
            }
        }

        Ok(score.min(1.0))
    }
}
