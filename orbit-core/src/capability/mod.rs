//! Capability inference and request-time gating (`AdapterCapabilities`,
//! `CapabilityModel`).
//!
//! # Example
//! ```
//! use orbit_core::capability::infer_capabilities;
//! use orbit_core::types::{AdapterConfig, AdapterType};
//!
//! let config = AdapterConfig::new("qa-sql", AdapterType::Retriever, "sqlite", "qa");
//! let caps = infer_capabilities(&config);
//! assert!(!caps.supports_threading);
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{AdapterCapabilities, AdapterConfig, AdapterType, ProcessingContext, RetrievalBehavior};

/// Infer [`AdapterCapabilities`] for `config` when none are declared
/// explicitly. Declared capabilities on `config` always win; this is only
/// consulted when `config.capabilities` is `None` at config-load time by
/// the caller (the registry passes the declared set through untouched).
#[must_use]
pub fn infer_capabilities(config: &AdapterConfig) -> AdapterCapabilities {
    let name_has_file = config.name.contains("file");

    if config.adapter_type == AdapterType::Passthrough && config.adapter == "conversational" {
        return AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::None,
            ..AdapterCapabilities::none()
        };
    }

    if config.adapter_type == AdapterType::Passthrough && config.adapter == "multimodal" {
        return AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Conditional,
            formatting_style: crate::types::FormattingStyle::Clean,
            supports_file_ids: true,
            skip_when_no_files: true,
            ..AdapterCapabilities::none()
        };
    }

    if config.adapter == "file" || name_has_file {
        return AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Always,
            formatting_style: crate::types::FormattingStyle::Clean,
            supports_file_ids: true,
            requires_api_key_validation: true,
            ..AdapterCapabilities::none()
        };
    }

    if config.adapter == "intent" {
        return AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Always,
            supports_threading: true,
            ..AdapterCapabilities::none()
        };
    }

    if config.adapter == "qa" {
        return AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Always,
            supports_threading: false,
            ..AdapterCapabilities::none()
        };
    }

    AdapterCapabilities {
        retrieval_behavior: RetrievalBehavior::Always,
        ..AdapterCapabilities::none()
    }
}

/// A resolved capability policy plus the behavior the pipeline consults at
/// request time. Wraps the frozen [`AdapterCapabilities`] record with the
/// two request-scoped operations: `should_retrieve` and
/// `build_retriever_kwargs`.
#[derive(Debug, Clone)]
pub struct CapabilityModel {
    pub capabilities: AdapterCapabilities,
}

impl CapabilityModel {
    #[must_use]
    pub fn new(capabilities: AdapterCapabilities) -> Self {
        Self { capabilities }
    }

    #[must_use]
    pub fn from_config(config: &AdapterConfig) -> Self {
        let capabilities = config
            .capabilities
            .clone()
            .unwrap_or_else(|| infer_capabilities(config));
        Self::new(capabilities)
    }

    /// Whether the pipeline should invoke this adapter's retriever for
    /// `context`. `None` never retrieves; `Always` always does;
    /// `Conditional` defers to `skip_when_no_files` when set, otherwise
    /// defaults to `true`.
    #[must_use]
    pub fn should_retrieve(&self, context: &ProcessingContext) -> bool {
        match self.capabilities.retrieval_behavior {
            RetrievalBehavior::None => false,
            RetrievalBehavior::Always => true,
            RetrievalBehavior::Conditional => {
                if self.capabilities.skip_when_no_files {
                    !context.file_ids.is_empty()
                } else {
                    true
                }
            }
        }
    }

    /// Project `context`'s metadata/session fields into the keyword
    /// arguments this adapter's retriever declared. Every
    /// `required_parameter` must be present or the call fails with
    /// [`Error::CapabilityViolation`]; `optional_parameters` are included
    /// only when present.
    pub fn build_retriever_kwargs(
        &self,
        context: &ProcessingContext,
        adapter_name: &str,
    ) -> Result<HashMap<String, Value>> {
        let mut kwargs = HashMap::new();

        for param in &self.capabilities.required_parameters {
            let Some(value) = lookup_context_field(context, param) else {
                return Err(Error::CapabilityViolation {
                    adapter: adapter_name.to_string(),
                    parameter: param.clone(),
                });
            };
            kwargs.insert(param.clone(), value);
        }

        for param in &self.capabilities.optional_parameters {
            if let Some(value) = lookup_context_field(context, param) {
                kwargs.insert(param.clone(), value);
            }
        }

        Ok(kwargs)
    }
}

fn lookup_context_field(context: &ProcessingContext, name: &str) -> Option<Value> {
    match name {
        "session_id" => context.session_id.clone().map(Value::String),
        "api_key" => context.api_key.clone().map(Value::String),
        "file_ids" => (!context.file_ids.is_empty())
            .then(|| Value::Array(context.file_ids.iter().cloned().map(Value::String).collect())),
        "message" => Some(Value::String(context.message.clone())),
        _ => context.metadata.get(name).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdapterType;

    fn config(adapter_type: AdapterType, adapter: &str, name: &str) -> AdapterConfig {
        AdapterConfig::new(name, adapter_type, "sqlite", adapter)
    }

    #[test]
    fn passthrough_conversational_never_retrieves() {
        let caps = infer_capabilities(&config(AdapterType::Passthrough, "conversational", "chat"));
        assert_eq!(caps.retrieval_behavior, RetrievalBehavior::None);
    }

    #[test]
    fn passthrough_multimodal_is_conditional_on_files() {
        let caps = infer_capabilities(&config(AdapterType::Passthrough, "multimodal", "vision"));
        assert_eq!(caps.retrieval_behavior, RetrievalBehavior::Conditional);
        assert!(caps.skip_when_no_files);
    }

    #[test]
    fn file_adapter_by_name_gets_file_capabilities() {
        let caps = infer_capabilities(&config(AdapterType::Retriever, "generic", "user-files"));
        assert!(caps.supports_file_ids);
        assert!(caps.requires_api_key_validation);
    }

    #[test]
    fn intent_adapter_supports_threading() {
        let caps = infer_capabilities(&config(AdapterType::Retriever, "intent", "intent-sql-postgres"));
        assert!(caps.supports_threading);
    }

    #[test]
    fn qa_adapter_does_not_support_threading() {
        let caps = infer_capabilities(&config(AdapterType::Retriever, "qa", "qa-sql"));
        assert!(!caps.supports_threading);
    }

    #[test]
    fn should_retrieve_false_for_none_behavior() {
        let model = CapabilityModel::new(AdapterCapabilities::none());
        let context = ProcessingContext::new("hi", "chat");
        assert!(!model.should_retrieve(&context));
    }

    #[test]
    fn should_retrieve_conditional_requires_files_when_skip_set() {
        let caps = AdapterCapabilities {
            retrieval_behavior: RetrievalBehavior::Conditional,
            skip_when_no_files: true,
            ..AdapterCapabilities::none()
        };
        let model = CapabilityModel::new(caps);
        let mut context = ProcessingContext::new("describe this", "vision");
        assert!(!model.should_retrieve(&context));
        context.file_ids.push("file-1".to_string());
        assert!(model.should_retrieve(&context));
    }

    #[test]
    fn build_retriever_kwargs_fails_on_missing_required_parameter() {
        let caps = AdapterCapabilities {
            required_parameters: vec!["session_id".to_string()],
            ..AdapterCapabilities::none()
        };
        let model = CapabilityModel::new(caps);
        let context = ProcessingContext::new("hi", "intent-sql-postgres");
        let err = model
            .build_retriever_kwargs(&context, "intent-sql-postgres")
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityViolation { .. }));
    }

    #[test]
    fn build_retriever_kwargs_includes_optional_when_present() {
        let caps = AdapterCapabilities {
            optional_parameters: vec!["session_id".to_string()],
            ..AdapterCapabilities::none()
        };
        let model = CapabilityModel::new(caps);
        let mut context = ProcessingContext::new("hi", "intent-sql-postgres");
        context.session_id = Some("s1".to_string());
        let kwargs = model
            .build_retriever_kwargs(&context, "intent-sql-postgres")
            .unwrap();
        assert_eq!(kwargs.get("session_id").unwrap(), "s1");
    }
}
