//! Elasticsearch query-DSL rendering and response formatting: binds
//! extracted parameters into a template's `query_dsl` document, then
//! turns a raw search response into ranked records the same way every
//! other backend does.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::RawRecord;
use crate::error::{Error, Result};
use crate::template::{QueryBody, Template};

/// Recursively bind `{name}`-style placeholders found in string leaves of
/// `query_dsl` against `extracted`, preserving JSON type when a leaf is
/// exactly one placeholder.
pub fn render(template: &Template, extracted: &HashMap<String, Value>) -> Result<Value> {
    let QueryBody::QueryDsl { query_dsl } = &template.body else {
        return Err(Error::TemplateRenderError {
            template_id: template.id.clone(),
            reason: "render::elasticsearch called on a non-query-dsl template".to_string(),
        });
    };
    bind(query_dsl, extracted, &template.id)
}

pub(crate) fn bind(value: &Value, extracted: &HashMap<String, Value>, template_id: &str) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                return extracted.get(name).cloned().ok_or_else(|| Error::TemplateRenderError {
                    template_id: template_id.to_string(),
                    reason: format!("undeclared placeholder '{{{name}}}' in query DSL"),
                });
            }
            Ok(Value::String(s.clone()))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), bind(v, extracted, template_id)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(bind(item, extracted, template_id)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// A formatted Elasticsearch response: ordered hit records followed by
/// rendered aggregation/suggest sections, plus response metadata.
#[derive(Debug, Clone, Default)]
pub struct FormattedResponse {
    pub records: Vec<RawRecord>,
    pub aggregation_text: Option<String>,
    pub suggest_text: Option<String>,
    pub response_metadata: HashMap<String, Value>,
}

/// Format a raw Elasticsearch response body: `hits.hits[]._source` (with
/// `_score`/`highlight` folded in) first, then `aggregations` rendered as
/// indented bucket lists, then `suggest`. Response metadata surfaces
/// `total_hits`, `took_ms`, and `timed_out`.
pub fn format_response(body: &Value) -> FormattedResponse {
    let mut records = Vec::new();
    if let Some(hits) = body.pointer("/hits/hits").and_then(Value::as_array) {
        for hit in hits {
            let mut record: RawRecord = hit
                .get("_source")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            if let Some(score) = hit.get("_score") {
                record.insert("_score".to_string(), score.clone());
            }
            if let Some(highlight) = hit.get("highlight") {
                record.insert("_highlights".to_string(), highlight.clone());
            }
            records.push(record);
        }
    }

    let aggregation_text = body
        .get("aggregations")
        .and_then(Value::as_object)
        .map(render_aggregations);

    let suggest_text = body.get("suggest").and_then(Value::as_object).map(render_suggest);

    let mut response_metadata = HashMap::new();
    if let Some(total) = body.pointer("/hits/total/value") {
        response_metadata.insert("total_hits".to_string(), total.clone());
    }
    if let Some(took) = body.get("took") {
        response_metadata.insert("took_ms".to_string(), took.clone());
    }
    if let Some(timed_out) = body.get("timed_out") {
        response_metadata.insert("timed_out".to_string(), timed_out.clone());
    }

    FormattedResponse {
        records,
        aggregation_text,
        suggest_text,
        response_metadata,
    }
}

fn render_aggregations(aggs: &Map<String, Value>) -> String {
    let mut names: Vec<&String> = aggs.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let mut lines = vec![format!("{name}:")];
            if let Some(buckets) = aggs[name].get("buckets").and_then(Value::as_array) {
                for bucket in buckets {
                    let key = bucket.get("key").map(Value::to_string).unwrap_or_default();
                    let count = bucket.get("doc_count").map(Value::to_string).unwrap_or_default();
                    lines.push(format!("  {key}: {count}"));
                }
            } else if let Some(value) = aggs[name].get("value") {
                lines.push(format!("  {value}"));
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_suggest(suggest: &Map<String, Value>) -> String {
    let mut names: Vec<&String> = suggest.keys().collect();
    names.sort();
    names
        .into_iter()
        .flat_map(|name| {
            suggest[name]
                .as_array()
                .into_iter()
                .flatten()
                .flat_map(|entry| entry.get("options").and_then(Value::as_array))
                .flatten()
                .filter_map(|opt| opt.get("text").and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
