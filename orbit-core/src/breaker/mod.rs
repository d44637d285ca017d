//! Per-adapter circuit breaker and the parallel executor used for
//! federated search.
//!
//! # Example
//! ```
//! use orbit_core::breaker::{CircuitBreakerRegistry, CircuitBreakerConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = CircuitBreakerRegistry::new();
//! let breaker = registry.get_or_create("intent-sql-sqlite", CircuitBreakerConfig::default()).await;
//! assert_eq!(breaker.stats().total_calls, 0);
//! # }
//! ```

mod states;

pub use states::{
    CallRecord, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    StateTransition,
};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;

use crate::error::Error;

/// A boxed, type-erased adapter call future, as passed to
/// [`ParallelExecutor::run_all`].
pub type BoxedAdapterFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;

/// Aggregate memory usage across all registered breakers.
#[derive(Debug, Clone, Default)]
pub struct MemoryUsageSummary {
    pub breaker_count: usize,
    pub total_call_history_entries: usize,
    pub total_state_transition_entries: usize,
    /// Coarse byte estimate: each call-history entry is modeled as 24
    /// bytes (u64 + bool + u64, padded), each transition as roughly 64
    /// bytes (two enum discriminants, a u64, and a short reason string).
    pub estimated_bytes: usize,
}

const CALL_RECORD_BYTES: usize = 24;
const STATE_TRANSITION_BYTES: usize = 64;

/// Process-wide registry of circuit breakers, one per adapter name. The
/// registry itself only guards breaker *creation*; each breaker's
/// internal state has its own lock so concurrent calls to different
/// adapters never contend.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch the breaker for `adapter_name`, creating it with `config` on
    /// first use. Lazily populated.
    pub async fn get_or_create(
        &self,
        adapter_name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(b) = breakers.get(adapter_name) {
                return Arc::clone(b);
            }
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(adapter_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(adapter_name, config)))
            .clone()
    }

    /// Run `force_cleanup` on every breaker whose `cleanup_interval` has
    /// elapsed. Intended to be driven by a periodic background task.
    pub async fn run_due_cleanups(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            if breaker.cleanup_due() {
                breaker.force_cleanup();
            }
        }
    }

    /// Final cleanup pass across all breakers, run on shutdown.
    pub async fn shutdown(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_cleanup();
        }
    }

    /// Record counts and a byte estimate across all breakers.
    pub async fn get_memory_usage_summary(&self) -> MemoryUsageSummary {
        let breakers = self.breakers.read().await;
        let mut summary = MemoryUsageSummary {
            breaker_count: breakers.len(),
            ..Default::default()
        };
        for breaker in breakers.values() {
            let stats = breaker.stats();
            summary.total_call_history_entries += stats.call_history.len();
            summary.total_state_transition_entries += stats.state_transitions.len();
        }
        summary.estimated_bytes = summary.total_call_history_entries * CALL_RECORD_BYTES
            + summary.total_state_transition_entries * STATE_TRANSITION_BYTES;
        summary
    }
}

/// Result of running one adapter call through the parallel executor.
pub struct AdapterCallOutcome<T> {
    pub adapter_name: String,
    pub result: Result<T, Error>,
}

/// Runs a set of adapter calls concurrently, each wrapped in its own
/// circuit breaker, aggregating into `(successes, failures)` without
/// failing the whole batch on any single error.
pub struct ParallelExecutor {
    registry: CircuitBreakerRegistry,
    breaker_config: CircuitBreakerConfig,
}

impl ParallelExecutor {
    #[must_use]
    pub fn new(registry: CircuitBreakerRegistry, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            registry,
            breaker_config,
        }
    }

    /// Run `calls` — `(adapter_name, boxed future)` pairs — concurrently.
    /// Each call is wrapped in its adapter's breaker. The returned vector
    /// preserves input order. Callers box each future (e.g.
    /// `Box::pin(retriever.get_relevant_context(query))`) since each
    /// child adapter's call produces a distinct, non-uniform future type.
    pub async fn run_all<T>(
        &self,
        calls: Vec<(String, BoxedAdapterFuture<T>)>,
    ) -> Vec<AdapterCallOutcome<T>>
    where
        T: Send + 'static,
    {
        let futures = calls.into_iter().map(|(adapter_name, call)| {
            let registry = self.registry.clone();
            let config = self.breaker_config.clone();
            async move {
                let breaker = registry.get_or_create(&adapter_name, config).await;
                let result = breaker.call(|| call).await;
                AdapterCallOutcome {
                    adapter_name,
                    result,
                }
            }
        });
        join_all(futures).await
    }

    /// Partition outcomes into `(successes, failures)`.
    #[must_use]
    pub fn partition<T>(
        outcomes: Vec<AdapterCallOutcome<T>>,
    ) -> (Vec<(String, T)>, Vec<(String, Error)>) {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(value) => successes.push((outcome.adapter_name, value)),
                Err(err) => failures.push((outcome.adapter_name, err)),
            }
        }
        (successes, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_returns_same_breaker_for_repeated_lookups() {
        let registry = CircuitBreakerRegistry::new();
        let b1 = registry
            .get_or_create("qa-sql", CircuitBreakerConfig::default())
            .await;
        let b2 = registry
            .get_or_create("qa-sql", CircuitBreakerConfig::default())
            .await;
        assert!(Arc::ptr_eq(&b1, &b2));
    }

    #[tokio::test]
    async fn parallel_executor_does_not_fail_whole_batch_on_one_error() {
        let executor = ParallelExecutor::new(
            CircuitBreakerRegistry::new(),
            CircuitBreakerConfig::default(),
        );
        let calls: Vec<(String, BoxedAdapterFuture<Vec<String>>)> = vec![
            (
                "intent-sql-sqlite-hr".to_string(),
                Box::pin(async { Ok(vec!["employee_by_department".to_string()]) }),
            ),
            (
                "intent-duckdb-ev-population".to_string(),
                Box::pin(async { Err(Error::InvalidInput("down".into())) }),
            ),
        ];
        let outcomes = executor.run_all(calls).await;
        let (successes, failures) = ParallelExecutor::partition(outcomes);
        assert_eq!(successes.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(successes[0].0, "intent-sql-sqlite-hr");
        assert_eq!(failures[0].0, "intent-duckdb-ev-population");
    }

    #[tokio::test]
    async fn memory_usage_summary_reflects_recorded_calls() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry
            .get_or_create("qa-sql", CircuitBreakerConfig::default())
            .await;
        let _ = breaker.call(|| async { Ok::<_, Error>(()) }).await;

        let summary = registry.get_memory_usage_summary().await;
        assert_eq!(summary.breaker_count, 1);
        assert_eq!(summary.total_call_history_entries, 1);
    }
}
