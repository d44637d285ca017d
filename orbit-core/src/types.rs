//! Core data model shared across the registry, retrievers, cache, and
//! pipeline: [`AdapterConfig`], [`AdapterCapabilities`], and
//! [`ProcessingContext`].
//!
//! [`crate::template`] holds `Template`/`TemplateMatch`, and
//! [`crate::cache::types`] holds `CachedResult` — both are data-model
//! members too, but are large enough to warrant their own module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` selector for an [`AdapterConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    Retriever,
    Passthrough,
    SpeechToSpeech,
}

/// Configuration for a single adapter, as loaded from `adapters.yaml`.
///
/// Created at config-load time and immutable for the lifetime of a
/// registration; replaced wholesale on hot-reload (see
/// [`crate::registry::AdapterRegistry::reload`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Unique name; the registry's lookup key for `get`.
    pub name: String,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub adapter_type: AdapterType,
    pub datasource: String,
    /// Domain tag, e.g. `qa`, `intent`, `file`, `conversational`, `multimodal`.
    pub adapter: String,
    /// Fully-qualified implementation path or factory id.
    pub implementation: String,
    #[serde(default)]
    pub inference_provider: Option<String>,
    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub capabilities: Option<AdapterCapabilities>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl AdapterConfig {
    /// Build a minimal enabled config with an empty `implementation` and
    /// no declared capabilities (so capability inference runs).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        adapter_type: AdapterType,
        datasource: impl Into<String>,
        adapter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            adapter_type,
            datasource: datasource.into(),
            adapter: adapter.into(),
            implementation: String::new(),
            inference_provider: None,
            embedding_provider: None,
            model: None,
            capabilities: None,
            config: HashMap::new(),
        }
    }
}

/// Retrieval gating policy for an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalBehavior {
    None,
    Always,
    Conditional,
}

/// Response formatting policy for a domain adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormattingStyle {
    Standard,
    Clean,
    Custom,
}

/// How tabular retrieval results are rendered into the formatted context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFormat {
    Null,
    MarkdownTable,
    Toon,
    Csv,
}

impl Default for ContextFormat {
    fn default() -> Self {
        Self::Null
    }
}

/// Decimal rounding applied to unformatted floats in rendered results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericPrecision {
    pub decimal_places: Option<u32>,
}

/// A frozen per-adapter policy record governing how the pipeline invokes
/// and formats around an adapter.
///
/// # Invariants
/// - `retrieval_behavior == None` implies the pipeline never calls the
///   adapter's retriever ([`crate::types::ProcessingContext::should_retrieve`]
///   is always `false`).
/// - `skip_when_no_files` is only meaningful when `retrieval_behavior ==
///   Conditional` and `supports_file_ids == true`.
/// - `formatting_style == Custom` requires the domain adapter to supply a
///   custom formatter; this is a config-load-time contract, not enforced
///   by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub retrieval_behavior: RetrievalBehavior,
    pub formatting_style: FormattingStyle,
    #[serde(default)]
    pub supports_file_ids: bool,
    #[serde(default)]
    pub supports_session_tracking: bool,
    #[serde(default)]
    pub supports_threading: bool,
    #[serde(default)]
    pub supports_language_filtering: bool,
    #[serde(default)]
    pub requires_api_key_validation: bool,
    #[serde(default)]
    pub skip_when_no_files: bool,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub optional_parameters: Vec<String>,
    #[serde(default)]
    pub context_format: ContextFormat,
    #[serde(default)]
    pub context_max_tokens: Option<usize>,
    #[serde(default)]
    pub numeric_precision: NumericPrecision,
}

impl AdapterCapabilities {
    /// A conservative default: no retrieval, standard formatting, no
    /// session features. Used when neither explicit config nor an
    /// inference rule applies.
    #[must_use]
    pub fn none() -> Self {
        Self {
            retrieval_behavior: RetrievalBehavior::None,
            formatting_style: FormattingStyle::Standard,
            supports_file_ids: false,
            supports_session_tracking: false,
            supports_threading: false,
            supports_language_filtering: false,
            requires_api_key_validation: false,
            skip_when_no_files: false,
            required_parameters: Vec::new(),
            optional_parameters: Vec::new(),
            context_format: ContextFormat::Null,
            context_max_tokens: None,
            numeric_precision: NumericPrecision::default(),
        }
    }
}

/// A retrieved record formatted and scored by a retriever.
///
/// `metadata` always includes `source`, `template_id`, `datasource`, and
/// may include `tool_execution`, `composite_routing`, `multistage_scoring`
/// when produced by the corresponding retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: HashMap<String, Value>,
    pub confidence: f64,
}

impl Document {
    /// Rough token estimate used by context-budget trimming: 1 token per
    /// 4 characters of `content`.
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.content.len().div_ceil(4)
    }
}

/// Request-scoped mutable state threaded through the pipeline steps.
/// Populated incrementally: inbound fields are set by the transport
/// layer, the rest by pipeline steps in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingContext {
    pub message: String,
    pub adapter_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    // Derived, populated by pipeline steps.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub capabilities: Option<AdapterCapabilities>,
    #[serde(default)]
    pub should_retrieve: bool,
    #[serde(default)]
    pub retrieved_docs: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formatted_context: Option<String>,
    #[serde(default)]
    pub is_followup: bool,
    #[serde(default)]
    pub followup_confidence: f64,
    #[serde(default)]
    pub cache_refresh_requested: bool,
    #[serde(default)]
    pub bypass_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_applicability_reason: Option<String>,
}

impl ProcessingContext {
    /// Build a fresh context for a new request. `message` and
    /// `adapter_name` are the only fields a transport layer must supply;
    /// every derived field starts unset.
    #[must_use]
    pub fn new(message: impl Into<String>, adapter_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            adapter_name: adapter_name.into(),
            ..Default::default()
        }
    }
}
