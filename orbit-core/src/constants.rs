//! Global constants for `orbit-core`.
//!
//! This module centralizes the magic numbers and string constants used by
//! the circuit breaker, follow-up cache, and composite retriever, making
//! them easier to audit and override from `config.yaml`.

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    // Circuit breaker
    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CIRCUIT_HALF_OPEN_TEST_PERIOD: Duration = Duration::from_secs(10);
    pub const CIRCUIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
    pub const CIRCUIT_RETENTION_PERIOD: Duration = Duration::from_secs(86400);
    pub const CIRCUIT_CALL_HISTORY_CAPACITY: usize = 200;
    pub const CIRCUIT_STATE_TRANSITION_CAPACITY: usize = 50;

    // Retry policy
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

    // Follow-up result cache
    pub const CACHE_THRESHOLD_HIGH: f64 = 0.80;
    pub const CACHE_THRESHOLD_LOW: f64 = 0.70;
    pub const CACHE_MAX_RESULT_SIZE_MB: usize = 10;
    pub const CACHE_RECENT_EMBEDDINGS_RING_SIZE: usize = 5;
    pub const CACHE_ENTRY_TTL: Duration = Duration::from_secs(900);
    pub const CACHE_MAX_ENTRIES: usize = 1000;

    // Composite retriever scoring weights — must sum to 1.0
    pub const COMPOSITE_WEIGHT_EMBEDDING: f64 = 0.5;
    pub const COMPOSITE_WEIGHT_RERANK: f64 = 0.3;
    pub const COMPOSITE_WEIGHT_STRING: f64 = 0.2;
    pub const COMPOSITE_WEIGHT_SUM_TOLERANCE: f64 = 0.01;

    // Base retriever confidence threshold
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

    // Timeouts
    pub const DEFAULT_DATASOURCE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_RERANKER_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(2);

    // Parallel executor
    pub const MAX_CONCURRENT_RETRIEVERS: usize = 8;

    // Pipeline budget trimming
    pub const DEFAULT_MAX_CONTEXT_DOCUMENTS: usize = 20;
}

/// ReDoS-safety bounds for intent retriever extraction patterns.
pub mod extraction {
    pub const MAX_PATTERN_LENGTH: usize = 1000;
    pub const MAX_REPETITIONS: usize = 100;
}

/// Log messages and prefixes, matched per-component for easy grepping.
pub mod logging {
    pub const LOG_PREFIX_REGISTRY: &str = "[REGISTRY]";
    pub const LOG_PREFIX_RETRIEVER: &str = "[RETRIEVER]";
    pub const LOG_PREFIX_COMPOSITE: &str = "[COMPOSITE]";
    pub const LOG_PREFIX_BREAKER: &str = "[BREAKER]";
    pub const LOG_PREFIX_CACHE: &str = "[CACHE]";
    pub const LOG_PREFIX_PIPELINE: &str = "[PIPELINE]";
}

/// File paths for configuration discovery.
pub mod paths {
    pub const DEFAULT_CONFIG_DIR: &str = "./config";
    pub const ADAPTERS_CONFIG_FILE: &str = "adapters.yaml";
    pub const DATASOURCES_CONFIG_FILE: &str = "datasources.yaml";
    pub const SERVER_CONFIG_FILE: &str = "config.yaml";
}

/// HTTP and API constants used by the HTTP intent retriever.
pub mod api {
    pub const DEFAULT_API_TIMEOUT_SECONDS: u64 = 30;
    pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 60;

    pub const USER_AGENT: &str = concat!("orbit-core/", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_thresholds_are_ordered() {
        assert!(defaults::CACHE_THRESHOLD_LOW < defaults::CACHE_THRESHOLD_HIGH);
        assert!(defaults::CACHE_THRESHOLD_HIGH <= 1.0);
    }

    #[test]
    fn composite_weights_sum_to_one() {
        let sum = defaults::COMPOSITE_WEIGHT_EMBEDDING
            + defaults::COMPOSITE_WEIGHT_RERANK
            + defaults::COMPOSITE_WEIGHT_STRING;
        assert!((sum - 1.0).abs() < defaults::COMPOSITE_WEIGHT_SUM_TOLERANCE);
    }

    #[test]
    fn circuit_breaker_timeouts_are_sane() {
        assert!(defaults::CIRCUIT_HALF_OPEN_TEST_PERIOD < defaults::CIRCUIT_RECOVERY_TIMEOUT);
        assert!(defaults::CIRCUIT_RETENTION_PERIOD > defaults::CIRCUIT_CLEANUP_INTERVAL);
    }

    #[test]
    fn retry_delays_are_ordered() {
        assert!(defaults::DEFAULT_RETRY_BASE_DELAY < defaults::DEFAULT_RETRY_MAX_DELAY);
    }
}
