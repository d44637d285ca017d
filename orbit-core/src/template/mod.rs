//! Intent templates: the YAML-declared recipes that map natural-language
//! examples and parameters to an executable query body.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Date,
}

/// A single declared parameter of a [`Template`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    /// Ordered regex list tried against the query during extraction, in
    /// declaration order, first match wins. Validated for ReDoS-safety at
    /// template load time, see [`crate::retriever::intent::extraction`].
    #[serde(default)]
    pub extraction_patterns: Vec<String>,
    /// Normalization hint (e.g. date format string, or "strip_commas").
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// The executable query body a template compiles to. Exactly one variant
/// is populated per template, decided at template-load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryBody {
    /// A parameterized SQL string; parameters are bound values, never
    /// concatenated.
    Sql { sql: String },
    /// A JSON query-DSL template (Elasticsearch / MongoDB aggregation).
    QueryDsl { query_dsl: Value },
    Http {
        method: String,
        endpoint_template: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body_template: Option<Value>,
    },
    Tool {
        tool_name: String,
        tool_operation: String,
    },
}

/// Output shape hint for rendering retrieved rows to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    #[default]
    PipeSeparated,
    MarkdownTable,
    Toon,
    Csv,
}

/// A single intent template: identity, matching metadata, parameter
/// declarations, and exactly one [`QueryBody`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Natural-language example phrases, concatenated and embedded once
    /// at retriever init to populate the template's vector collection
    /// entry.
    pub nl_examples: Vec<String>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(flatten)]
    pub body: QueryBody,
    #[serde(default)]
    pub result_format: ResultFormat,
    #[serde(default)]
    pub display_fields: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Template {
    /// The text embedded to build this template's vector-store entry:
    /// description followed by every natural-language example, so the
    /// query embedding is compared against the template's full intent
    /// surface rather than just its id.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut text = self.description.clone();
        for example in &self.nl_examples {
            text.push('\n');
            text.push_str(example);
        }
        text
    }

    /// Validate that every parameter the query body references has a
    /// matching declaration. Only checks
    /// `Sql` bodies, where placeholders are named `:name`; other body
    /// kinds are validated by their own renderers since their
    /// placeholder syntax differs (JSON path vs. URL template).
    pub fn validate_declared_parameters(&self) -> Result<()> {
        if let QueryBody::Sql { sql } = &self.body {
            let declared: std::collections::HashSet<&str> =
                self.parameters.iter().map(|p| p.name.as_str()).collect();
            for placeholder in extract_placeholders(sql) {
                if !declared.contains(placeholder.as_str()) {
                    return Err(Error::TemplateRenderError {
                        template_id: self.id.clone(),
                        reason: format!("undeclared placeholder ':{placeholder}' in SQL body"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn extract_placeholders(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_alphabetic() {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            out.push(sql[start..end].to_string());
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

/// A transient candidate produced during template matching. Discarded per request; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub template_id: String,
    pub source_adapter: String,
    pub template_data: Template,
    pub embedding_text: String,
    pub embedding_score: f64,
    #[serde(default)]
    pub rerank_score: Option<f64>,
    #[serde(default)]
    pub string_similarity_score: Option<f64>,
    #[serde(default)]
    pub combined_score: Option<f64>,
    #[serde(default)]
    pub scoring_details: HashMap<String, Value>,
}

impl TemplateMatch {
    /// The score used for threshold checks and tie-breaking before
    /// multi-stage scoring runs: the combined score if computed,
    /// otherwise the raw embedding score.
    #[must_use]
    pub fn ranking_score(&self) -> f64 {
        self.combined_score.unwrap_or(self.embedding_score)
    }
}
