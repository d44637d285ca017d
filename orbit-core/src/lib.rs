#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::unused_self)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::borrowed_box)]
#![allow(clippy::float_cmp)]
#![allow(clippy::ref_option)]

//! # ORBIT Core
//!
//! Adapter registry, capability model, and retrieval subsystem underlying
//! the ORBIT retrieval-augmented inference server: the pieces that decide
//! *which* adapter answers a request, *whether* it retrieves, *how* the
//! retrieval executes against a concrete backend, and *what* gets handed
//! back as formatted context. Inference itself, and the transport that
//! carries requests in, are outside this crate — see [`server::Pipeline`]
//! for the boundary.
//!
//! ## Module Organization
//!
//! ### Request flow
//! - [`server`]: transport-agnostic `ChatRequest`/`ChatChunk`/`Pipeline` contract
//! - [`pipeline`]: the four ordered steps that turn a request into formatted context
//! - [`capability`]: per-adapter retrieval gating and kwargs projection
//! - [`cache`]: session-scoped follow-up result cache
//!
//! ### Retrieval
//! - [`retriever`]: the `Retriever` trait, template matching, intent retrievers, and the composite retriever
//! - [`template`]: intent template declarations (`Template`, `Parameter`, `QueryBody`)
//! - [`domain`]: per-domain document formatting and answer extraction
//! - [`providers`]: embedding, reranking, and follow-up classification seams
//!
//! ### Adapter lifecycle
//! - [`registry`]: adapter registration, construction, and hot reload
//! - [`config`]: YAML configuration loading with `${ENV_VAR}` substitution
//!
//! ### Fault tolerance and observability
//! - [`breaker`]: per-adapter circuit breaker and the parallel executor
//! - [`retry`]: retry policy with exponential backoff
//! - [`telemetry`]: counters, histograms, and gauges
//! - [`tracing`]: correlation IDs and subscriber initialization
//!
//! ### Shared
//! - [`types`]: `AdapterConfig`, `AdapterCapabilities`, `ProcessingContext`, `Document`
//! - [`error`]: the crate's `Error`/`Result` types
//! - [`constants`]: defaults, size limits, and well-known paths
//!
//! ## Quick Start
//!
//! ```no_run
//! use orbit_core::registry::AdapterRegistry;
//! use orbit_core::config::ConfigLoader;
//!
//! # #[tokio::main]
//! # async fn main() -> orbit_core::error::Result<()> {
//! let loader = ConfigLoader::default_dir();
//! let adapters = loader.load_adapters()?;
//!
//! let registry = AdapterRegistry::new();
//! // Factories registering each adapter's constructor live with the
//! // concrete backend integration; this crate only defines the contract.
//! println!("loaded {} adapter configs", adapters.len());
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cache;
pub mod capability;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod telemetry;
pub mod tracing;
pub mod template;
pub mod types;

pub use error::{CacheError, Error, Result};
pub use retriever::Retriever;
pub use types::{AdapterCapabilities, AdapterConfig, Document, ProcessingContext};
