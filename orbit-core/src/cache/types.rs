//! The session-scoped cached retrieval result and
//! its lookup key.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;

/// `(session_id, adapter_name)` — the follow-up cache's lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub session_id: String,
    pub adapter_name: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(session_id: impl Into<String>, adapter_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            adapter_name: adapter_name.into(),
        }
    }
}

/// Row-count, applied filters, and time-window metadata describing the
/// cached result set, consulted by the applicability check.
#[derive(Debug, Clone, Default)]
pub struct ResultMetadata {
    pub row_count: usize,
    pub filters: HashMap<String, Value>,
    pub time_window: Option<(String, String)>,
}

/// A cached retrieval result for one `(session_id, adapter_name)` pair.
/// Owned exclusively by the follow-up cache; callers receive immutable
/// snapshots.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub original_query: String,
    pub original_embedding: Vec<f32>,
    /// Bounded ring of embeddings for queries accepted as follow-ups
    /// since the original, most recent last.
    pub recent_followup_embeddings: VecDeque<Vec<f32>>,
    pub recent_followup_capacity: usize,
    pub sql_or_query_executed: String,
    pub results: Vec<Value>,
    pub result_columns: Vec<String>,
    pub result_metadata: ResultMetadata,
    pub created_at: Instant,
    pub last_touched: Instant,
    pub ttl: Duration,
    /// Whether the last classification was "is a follow-up" — the sticky
    /// state hysteresis reads back.
    pub last_classified_as_followup: bool,
}

impl CachedResult {
    #[must_use]
    pub fn new(
        original_query: impl Into<String>,
        original_embedding: Vec<f32>,
        sql_or_query_executed: impl Into<String>,
        results: Vec<Value>,
        result_columns: Vec<String>,
        result_metadata: ResultMetadata,
        ttl: Duration,
        recent_followup_capacity: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            original_query: original_query.into(),
            original_embedding,
            recent_followup_embeddings: VecDeque::new(),
            recent_followup_capacity,
            sql_or_query_executed: sql_or_query_executed.into(),
            results,
            result_columns,
            result_metadata,
            created_at: now,
            last_touched: now,
            ttl,
            last_classified_as_followup: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.last_touched.elapsed() >= self.ttl
    }

    /// Approximate size in bytes, used to enforce `max_result_size_mb`
    /// before storing a new result.
    #[must_use]
    pub fn approximate_size_bytes(&self) -> usize {
        self.results
            .iter()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum::<usize>()
            + self.sql_or_query_executed.len()
            + self.original_query.len()
    }

    /// Record an accepted follow-up: push its embedding into the bounded
    /// ring and reset the TTL clock.
    pub fn record_followup(&mut self, embedding: Vec<f32>) {
        if self.recent_followup_embeddings.len() >= self.recent_followup_capacity {
            self.recent_followup_embeddings.pop_front();
        }
        self.recent_followup_embeddings.push_back(embedding);
        self.last_touched = Instant::now();
        self.last_classified_as_followup = true;
    }
}
