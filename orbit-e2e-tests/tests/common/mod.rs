//! Shared fixtures for the end-to-end scenario tests. Not a test binary
//! itself (`tests/common/mod.rs` is excluded from cargo's test
//! auto-discovery).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orbit_core::error::{Error, Result};
use orbit_core::retriever::intent::{DatasourceClient, ExecutionOutcome, RenderedQuery};

/// A [`DatasourceClient`] that fails its first `fail_count` calls, then
/// succeeds with an empty row set — drives circuit-breaker open/half-open
/// scenarios without a real backend.
pub struct FlakyClient {
    pub fail_count: usize,
    pub calls: AtomicUsize,
}

impl FlakyClient {
    #[must_use]
    pub fn new(fail_count: usize) -> Arc<Self> {
        Arc::new(Self { fail_count, calls: AtomicUsize::new(0) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasourceClient for FlakyClient {
    async fn execute(&self, _rendered: &RenderedQuery) -> Result<ExecutionOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count {
            return Err(Error::DatasourceError {
                adapter: "flaky".to_string(),
                message: "simulated datasource outage".to_string(),
            });
        }
        Ok(ExecutionOutcome::default())
    }
}
