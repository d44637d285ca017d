//! Session-scoped follow-up result cache.
//!
//! # Example
//! ```
//! use orbit_core::cache::{FollowupCache, FollowupCacheConfig};
//! use orbit_core::cache::types::CacheKey;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = FollowupCache::new(FollowupCacheConfig::default());
//! let key = CacheKey::new("session-1", "intent-sql-postgres");
//! assert!(cache.get_snapshot(&key).await.is_none());
//! # }
//! ```

pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::constants::defaults as d;
use crate::error::{CacheError, Error, Result};
use crate::providers::{cosine_similarity, FollowupClassifier};
use types::{CacheKey, CachedResult};

/// Weights for blending the three follow-up confidence signals. Must sum
/// to 1.0; default is equal weighting across all three.
#[derive(Debug, Clone, Copy)]
pub struct BlendWeights {
    pub original_similarity: f64,
    pub recent_similarity: f64,
    pub classifier: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            original_similarity: 1.0 / 3.0,
            recent_similarity: 1.0 / 3.0,
            classifier: 1.0 / 3.0,
        }
    }
}

/// Configuration for [`FollowupCache`].
#[derive(Debug, Clone)]
pub struct FollowupCacheConfig {
    pub threshold_high: f64,
    pub threshold_low: f64,
    pub max_result_size_mb: usize,
    pub entry_ttl: Duration,
    pub recent_followup_capacity: usize,
    pub blend_weights: BlendWeights,
    /// Whole-word refresh keywords.
    pub refresh_keywords: Vec<String>,
    /// Lowercase stopwords excluded from the applicability dimension
    /// check.
    pub applicability_stopwords: HashSet<String>,
    /// Small synonym table mapping a query term to the `result_columns`
    /// name it refers to (e.g. "area" -> "region").
    pub applicability_synonyms: HashMap<String, String>,
}

impl Default for FollowupCacheConfig {
    fn default() -> Self {
        Self {
            threshold_high: d::CACHE_THRESHOLD_HIGH,
            threshold_low: d::CACHE_THRESHOLD_LOW,
            max_result_size_mb: d::CACHE_MAX_RESULT_SIZE_MB,
            entry_ttl: d::CACHE_ENTRY_TTL,
            recent_followup_capacity: d::CACHE_RECENT_EMBEDDINGS_RING_SIZE,
            blend_weights: BlendWeights::default(),
            refresh_keywords: default_refresh_keywords(),
            applicability_stopwords: default_stopwords(),
            applicability_synonyms: HashMap::new(),
        }
    }
}

fn default_refresh_keywords() -> Vec<String> {
    [
        "latest", "current", "now", "today", "refresh", "re-run", "reload", "update",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_stopwords() -> HashSet<String> {
    [
        "show", "me", "the", "a", "an", "of", "for", "by", "in", "on", "to", "what", "was",
        "were", "is", "are", "top", "all", "give", "please", "can", "you", "list",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// The outcome of evaluating a query against a session's cached result.
/// Carries everything the pipeline needs to populate
/// [`crate::types::ProcessingContext`]'s cache-related fields and the
/// response metadata.
#[derive(Debug, Clone, Default)]
pub struct FollowupDecision {
    pub cache_hit: bool,
    pub query_similarity: f64,
    pub followup_confidence: f64,
    pub cached_query: Option<String>,
    pub cache_refresh: bool,
    pub refresh_reason: Option<String>,
    pub cache_applicability_reason: Option<String>,
}

/// Session-scoped cache of retrieval results, keyed by `(session_id,
/// adapter_name)`. At most one writer per key; readers see a
/// consistent snapshot.
#[derive(Clone)]
pub struct FollowupCache {
    config: FollowupCacheConfig,
    entries: Arc<RwLock<HashMap<CacheKey, CachedResult>>>,
}

impl FollowupCache {
    #[must_use]
    pub fn new(config: FollowupCacheConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Immutable snapshot of the cached entry for `key`, if any and not
    /// expired.
    pub async fn get_snapshot(&self, key: &CacheKey) -> Option<CachedResult> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|c| !c.is_expired())
            .cloned()
    }

    /// Evaluate `query` against the cached entry for `key`. Does not mutate the cache beyond updating the sticky
    /// hysteresis flag and clearing an inapplicable/refreshed/expired
    /// entry; accepting a follow-up's side effects (ring update, TTL
    /// reset) happen in [`Self::accept_followup`].
    pub async fn evaluate(
        &self,
        key: &CacheKey,
        query: &str,
        query_embedding: Option<&[f32]>,
        bypass_cache: bool,
        classifier: Option<&dyn FollowupClassifier>,
    ) -> Result<FollowupDecision> {
        let mut entries = self.entries.write().await;

        let Some(cached) = entries.get(key) else {
            return Ok(FollowupDecision::default());
        };
        if cached.is_expired() {
            entries.remove(key);
            return Ok(FollowupDecision::default());
        }

        if bypass_cache {
            entries.remove(key);
            return Ok(FollowupDecision {
                cache_refresh: true,
                refresh_reason: Some("bypass_requested".to_string()),
                ..Default::default()
            });
        }

        let has_refresh_keyword = contains_refresh_keyword(query, &self.config.refresh_keywords);

        let s_orig = query_embedding
            .map(|e| f64::from(cosine_similarity(e, &cached.original_embedding)))
            .unwrap_or(0.0);
        let s_recent = query_embedding.map_or(0.0, |e| {
            cached
                .recent_followup_embeddings
                .iter()
                .map(|prev| f64::from(cosine_similarity(e, prev)))
                .fold(0.0_f64, f64::max)
        });
        let p_cls = if let Some(clf) = classifier {
            clf.classify(&cached.original_query, query).await?
        } else {
            // Embedding-unavailable / no-classifier degradation: fall back
            // to a neutral probability rather than failing the request.
            0.5
        };

        let w = self.config.blend_weights;
        let confidence =
            w.original_similarity * s_orig + w.recent_similarity * s_recent + w.classifier * p_cls;

        // Refresh-keyword bypass requires both the keyword and high
        // confidence — an unrelated query
        // that happens to contain "latest" must not be treated as a
        // refresh of an unrelated cached result.
        if has_refresh_keyword && confidence >= self.config.threshold_high {
            entries.remove(key);
            return Ok(FollowupDecision {
                query_similarity: s_orig,
                followup_confidence: confidence,
                cache_refresh: true,
                refresh_reason: Some("keywords_detected".to_string()),
                ..Default::default()
            });
        }

        let is_followup = if confidence >= self.config.threshold_high {
            true
        } else if confidence <= self.config.threshold_low {
            false
        } else {
            // Hysteresis: between thresholds, stick with the last
            // classification.
            cached.last_classified_as_followup
        };

        if !is_followup {
            entries.remove(key);
            return Ok(FollowupDecision {
                query_similarity: s_orig,
                followup_confidence: confidence,
                ..Default::default()
            });
        }

        if let Some(reason) = check_applicability(
            query,
            &cached.result_columns,
            &self.config.applicability_stopwords,
            &self.config.applicability_synonyms,
        ) {
            entries.remove(key);
            return Ok(FollowupDecision {
                query_similarity: s_orig,
                followup_confidence: confidence,
                cache_applicability_reason: Some(reason),
                ..Default::default()
            });
        }

        if let Some(cached_mut) = entries.get_mut(key) {
            cached_mut.last_classified_as_followup = true;
        }

        Ok(FollowupDecision {
            cache_hit: true,
            query_similarity: s_orig,
            followup_confidence: confidence,
            cached_query: Some(cached.original_query.clone()),
            ..Default::default()
        })
    }

    /// Record that `query_embedding` was accepted as a follow-up: push it
    /// onto the ring and reset the TTL. Call only
    /// after [`Self::evaluate`] returned `cache_hit: true`.
    pub async fn accept_followup(&self, key: &CacheKey, query_embedding: Vec<f32>) -> Option<CachedResult> {
        let mut entries = self.entries.write().await;
        let cached = entries.get_mut(key)?;
        cached.record_followup(query_embedding);
        Some(cached.clone())
    }

    /// Store a fresh result, enforcing `max_result_size_mb`.
    pub async fn store(&self, key: CacheKey, cached: CachedResult) -> Result<()> {
        let size_bytes = cached.approximate_size_bytes();
        let max_bytes = self.config.max_result_size_mb * 1024 * 1024;
        if size_bytes > max_bytes {
            return Err(Error::Cache(CacheError::EntryTooLarge {
                key: format!("{}:{}", key.session_id, key.adapter_name),
                size: size_bytes,
                max_size: max_bytes,
            }));
        }
        let mut entries = self.entries.write().await;
        entries.insert(key, cached);
        Ok(())
    }

    /// Remove the cached entry for `key`, if any.
    pub async fn clear(&self, key: &CacheKey) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}

fn contains_refresh_keyword(query: &str, keywords: &[String]) -> bool {
    let lower = query.to_lowercase();
    let words: HashSet<&str> = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
        .collect();
    keywords.iter().any(|kw| words.contains(kw.as_str()))
}

/// Normalize a simple plural to its singular form for comparison against
/// `result_columns`, which are typically declared in singular form (e.g.
/// "region", not "regions").
fn singularize(term: &str) -> String {
    if term.len() > 3 && term.ends_with('s') && !term.ends_with("ss") {
        term[..term.len() - 1].to_string()
    } else {
        term.to_string()
    }
}

/// Term-to-dimension applicability check. Tokenizes `query`, drops stopwords, and checks each
/// remaining term against `result_columns` (case-insensitive substring
/// match, after singularizing) and `synonyms`. The first unmatched term
/// becomes `missing_dimension:<term>`; `None` means every term is
/// covered.
fn check_applicability(
    query: &str,
    result_columns: &[String],
    stopwords: &HashSet<String>,
    synonyms: &HashMap<String, String>,
) -> Option<String> {
    let lower_columns: Vec<String> = result_columns.iter().map(|c| c.to_lowercase()).collect();

    for raw_term in query.to_lowercase().split_whitespace() {
        let term: String = raw_term
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if term.is_empty() || stopwords.contains(&term) {
            continue;
        }
        let singular = singularize(&term);
        if stopwords.contains(&singular) {
            continue;
        }

        let mapped = synonyms.get(&term).or_else(|| synonyms.get(&singular));
        let candidate = mapped.cloned().unwrap_or_else(|| singular.clone());

        let covered = lower_columns
            .iter()
            .any(|col| col.contains(&candidate) || candidate.contains(col.as_str()));
        if !covered {
            return Some(format!("missing_dimension:{candidate}"));
        }
    }
    None
}
