//! Configuration loading: `adapters.yaml`, `datasources.yaml`, and
//! `config.yaml` under a config directory, with `${ENV_VAR}` substitution
//! applied to the raw YAML text before parsing.
//!
//! # Examples
//!
//! ```no_run
//! use orbit_core::config::ConfigLoader;
//!
//! let loader = ConfigLoader::new("./config");
//! let adapters = loader.load_adapters().unwrap();
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, paths};
use crate::error::{Error, Result};
use crate::retriever::composite::{ScoringWeights, SimilarityAlgorithm, TieBreaker};
use crate::types::AdapterConfig;

/// A single declared datasource connection (non-secret fields only; the
/// adapter's `config` map carries backend-specific connection details
/// loaded separately, typically from environment variables).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: HashMap<String, serde_yaml::Value>,
}

/// Global composite-retrieval settings, matched to [`super::retriever::composite::CompositeConfig`]'s
/// shape but kept as plain deserializable fields here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeRetrievalSettings {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_templates_per_source")]
    pub max_templates_per_source: usize,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub string_similarity_algorithm: StringSimilarityAlgorithmSetting,
    #[serde(default = "default_true")]
    pub cache_rerank_results: bool,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub multi_stage_enabled: bool,
}

fn default_confidence_threshold() -> f64 {
    defaults::DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_max_templates_per_source() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl_seconds() -> u64 {
    300
}

impl Default for CompositeRetrievalSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_templates_per_source: default_max_templates_per_source(),
            scoring: ScoringSettings::default(),
            string_similarity_algorithm: StringSimilarityAlgorithmSetting::default(),
            cache_rerank_results: true,
            cache_ttl_seconds: default_cache_ttl_seconds(),
            multi_stage_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringSettings {
    #[serde(default)]
    pub weight_embedding: f64,
    #[serde(default)]
    pub weight_rerank: f64,
    #[serde(default)]
    pub weight_string: f64,
    #[serde(default)]
    pub normalize_scores: bool,
    #[serde(default)]
    pub tie_breaker: TieBreakerSetting,
    #[serde(default = "default_top_candidates")]
    pub top_candidates: usize,
}

fn default_top_candidates() -> usize {
    10
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            weight_embedding: defaults::COMPOSITE_WEIGHT_EMBEDDING,
            weight_rerank: defaults::COMPOSITE_WEIGHT_RERANK,
            weight_string: defaults::COMPOSITE_WEIGHT_STRING,
            normalize_scores: false,
            tie_breaker: TieBreakerSetting::default(),
            top_candidates: default_top_candidates(),
        }
    }
}

impl ScoringSettings {
    #[must_use]
    pub fn weights(&self) -> ScoringWeights {
        ScoringWeights {
            embedding: self.weight_embedding,
            rerank: self.weight_rerank,
            string: self.weight_string,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakerSetting {
    #[default]
    HigherEmbeddingScore,
    ConfigurationOrder,
}

impl From<TieBreakerSetting> for TieBreaker {
    fn from(value: TieBreakerSetting) -> Self {
        match value {
            TieBreakerSetting::HigherEmbeddingScore => TieBreaker::HigherEmbeddingScore,
            TieBreakerSetting::ConfigurationOrder => TieBreaker::ConfigurationOrder,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringSimilarityAlgorithmSetting {
    #[default]
    JaroWinkler,
    NormalizedLevenshtein,
}

impl From<StringSimilarityAlgorithmSetting> for SimilarityAlgorithm {
    fn from(value: StringSimilarityAlgorithmSetting) -> Self {
        match value {
            StringSimilarityAlgorithmSetting::JaroWinkler => SimilarityAlgorithm::JaroWinkler,
            StringSimilarityAlgorithmSetting::NormalizedLevenshtein => SimilarityAlgorithm::NormalizedLevenshtein,
        }
    }
}

/// Top-level `config.yaml` shape: global settings not owned by a single
/// adapter or datasource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub composite_retrieval: CompositeRetrievalSettings,
    #[serde(default)]
    pub fault_tolerance: FaultToleranceSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultToleranceSettings {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    defaults::CIRCUIT_FAILURE_THRESHOLD
}
fn default_recovery_timeout_secs() -> u64 {
    defaults::CIRCUIT_RECOVERY_TIMEOUT.as_secs()
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

/// Substitute `${ENV_VAR}` occurrences in `text` with the named
/// environment variable's value. An unset variable substitutes to an
/// empty string rather than failing, so optional secrets can be omitted
/// in development without blocking config load.
fn substitute_env_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c2) in chars.by_ref() {
                if c2 == '}' {
                    closed = true;
                    break;
                }
                name.push(c2);
            }
            if closed {
                out.push_str(&std::env::var(&name).unwrap_or_default());
            } else {
                out.push_str("${");
                out.push_str(&name);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Loads and parses the three YAML configuration files from one
/// directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    #[must_use]
    pub fn default_dir() -> Self {
        Self::new(paths::DEFAULT_CONFIG_DIR)
    }

    fn read_and_substitute(&self, file_name: &str) -> Result<String> {
        let path: &Path = &self.config_dir.join(file_name);
        let raw = std::fs::read_to_string(path)?;
        Ok(substitute_env_vars(&raw))
    }

    /// Parse `adapters.yaml` into a flat list of declared adapters.
    pub fn load_adapters(&self) -> Result<Vec<AdapterConfig>> {
        let text = self.read_and_substitute(paths::ADAPTERS_CONFIG_FILE)?;
        #[derive(Deserialize)]
        struct Wrapper {
            adapters: Vec<AdapterConfig>,
        }
        let wrapper: Wrapper = serde_yaml::from_str(&text)?;
        Ok(wrapper.adapters)
    }

    /// Parse `datasources.yaml` into a flat list of declared datasources.
    pub fn load_datasources(&self) -> Result<Vec<DatasourceConfig>> {
        let text = self.read_and_substitute(paths::DATASOURCES_CONFIG_FILE)?;
        #[derive(Deserialize)]
        struct Wrapper {
            datasources: Vec<DatasourceConfig>,
        }
        let wrapper: Wrapper = serde_yaml::from_str(&text)?;
        Ok(wrapper.datasources)
    }

    /// Parse `config.yaml` into the global server configuration.
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let text = self.read_and_substitute(paths::SERVER_CONFIG_FILE)?;
        let config: ServerConfig = serde_yaml::from_str(&text)?;
        validate_server_config(&config)?;
        Ok(config)
    }
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    let sum = config.composite_retrieval.scoring.weight_embedding
        + config.composite_retrieval.scoring.weight_rerank
        + config.composite_retrieval.scoring.weight_string;
    if (sum - 1.0).abs() > defaults::COMPOSITE_WEIGHT_SUM_TOLERANCE {
        return Err(Error::Configuration(format!(
            "composite_retrieval.scoring weights must sum to 1.0, got {sum}"
        )));
    }
    Ok(())
}
