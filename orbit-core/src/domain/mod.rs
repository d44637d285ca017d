//! Domain adapters: the formatting/answer-extraction policy layered over
//! a retriever's raw records.
//!
//! A `DomainAdapter` has no opinion on *how* records are fetched — that is
//! the retriever's job — only on how they are shaped into a
//! [`crate::types::Document`], how a direct answer (if any) is surfaced,
//! and how domain-specific post-filters are applied.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{ContextFormat, Document, NumericPrecision};

/// Raw tabular/structured records as returned by a datasource query,
/// prior to domain-specific formatting.
pub type RawRecord = HashMap<String, Value>;

/// Polymorphic capability set every domain variant implements.
pub trait DomainAdapter: Send + Sync {
    /// Turn one raw record into a [`Document`]. `metadata` seeds the
    /// document's metadata map (the caller has already populated
    /// `source`/`template_id`/`datasource`).
    fn format_document(&self, raw: &RawRecord, metadata: HashMap<String, Value>) -> Document;

    /// Pull a short, direct answer out of already-formatted documents, if
    /// this domain supports one (e.g. a QA adapter flattening a single
    /// `answer` field). Returns `None` when no direct answer applies.
    fn extract_direct_answer(&self, docs: &[Document]) -> Option<String>;

    /// Apply any domain-specific post-filtering of documents against the
    /// original query (e.g. language filtering, citation stripping).
    /// Default is the identity filter.
    fn apply_domain_specific_filtering(&self, docs: Vec<Document>, _query: &str) -> Vec<Document> {
        docs
    }
}

/// No special formatting or answer extraction; records are rendered with
/// their raw field/value pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDomainAdapter;

impl DomainAdapter for GenericDomainAdapter {
    fn format_document(&self, raw: &RawRecord, metadata: HashMap<String, Value>) -> Document {
        let content = render_fields(raw);
        Document {
            content,
            metadata,
            confidence: 1.0,
        }
    }

    fn extract_direct_answer(&self, _docs: &[Document]) -> Option<String> {
        None
    }
}

/// Flattens question/answer pairs, preserving the record's confidence
/// field (if present) as the document's confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct QaDomainAdapter;

impl DomainAdapter for QaDomainAdapter {
    fn format_document(&self, raw: &RawRecord, metadata: HashMap<String, Value>) -> Document {
        let question = raw.get("question").and_then(Value::as_str).unwrap_or("");
        let answer = raw.get("answer").and_then(Value::as_str).unwrap_or("");
        let confidence = raw
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        Document {
            content: format!("Q: {question}\nA: {answer}"),
            metadata,
            confidence,
        }
    }

    fn extract_direct_answer(&self, docs: &[Document]) -> Option<String> {
        let best = docs
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())?;
        best.content
            .rsplit_once("A: ")
            .map(|(_, answer)| answer.to_string())
    }
}

/// Manages a domain config and template library; renders tabular data in
/// the capability-selected [`ContextFormat`].
#[derive(Debug, Clone)]
pub struct IntentDomainAdapter {
    pub context_format: ContextFormat,
    pub numeric_precision: NumericPrecision,
}

impl IntentDomainAdapter {
    #[must_use]
    pub fn new(context_format: ContextFormat, numeric_precision: NumericPrecision) -> Self {
        Self {
            context_format,
            numeric_precision,
        }
    }

    fn render_value(&self, value: &Value) -> String {
        if let Some(f) = value.as_f64() {
            if let Some(places) = self.numeric_precision.decimal_places {
                return format!("{f:.places$}", places = places as usize);
            }
        }
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn render_rows(&self, rows: &[RawRecord]) -> String {
        if rows.is_empty() {
            return String::new();
        }
        let mut columns: Vec<&String> = rows[0].keys().collect();
        columns.sort();

        match self.context_format {
            ContextFormat::MarkdownTable => {
                let header = format!("| {} |", columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" | "));
                let sep = format!("|{}|", columns.iter().map(|_| "---").collect::<Vec<_>>().join("|"));
                let body = rows
                    .iter()
                    .map(|row| {
                        let cells: Vec<String> = columns
                            .iter()
                            .map(|c| row.get(*c).map(|v| self.render_value(v)).unwrap_or_default())
                            .collect();
                        format!("| {} |", cells.join(" | "))
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{header}\n{sep}\n{body}")
            }
            ContextFormat::Csv => {
                let header = columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",");
                let body = rows
                    .iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| row.get(*c).map(|v| self.render_value(v)).unwrap_or_default())
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{header}\n{body}")
            }
            ContextFormat::Toon | ContextFormat::Null => rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| format!("{c}={}", row.get(*c).map(|v| self.render_value(v)).unwrap_or_default()))
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl DomainAdapter for IntentDomainAdapter {
    fn format_document(&self, raw: &RawRecord, metadata: HashMap<String, Value>) -> Document {
        let content = self.render_rows(std::slice::from_ref(raw));
        Document {
            content,
            metadata,
            confidence: 1.0,
        }
    }

    fn extract_direct_answer(&self, _docs: &[Document]) -> Option<String> {
        None
    }
}

/// Clean, citation-free formatting for file-backed adapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDomainAdapter;

impl DomainAdapter for FileDomainAdapter {
    fn format_document(&self, raw: &RawRecord, metadata: HashMap<String, Value>) -> Document {
        let content = raw
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Document {
            content,
            metadata,
            confidence: 1.0,
        }
    }

    fn extract_direct_answer(&self, _docs: &[Document]) -> Option<String> {
        None
    }

    fn apply_domain_specific_filtering(&self, docs: Vec<Document>, _query: &str) -> Vec<Document> {
        // Strip any citation markers a file-based source embedded in its
        // content; file answers are presented without source markers.
        docs.into_iter()
            .map(|mut d| {
                d.content = strip_citation_markers(&d.content);
                d
            })
            .collect()
    }
}

fn strip_citation_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut lookahead = chars.clone();
            if lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
                // Consume a `[n]`-style citation marker.
                let mut consumed = Vec::new();
                while let Some(&next) = chars.peek() {
                    consumed.push(next);
                    chars.next();
                    if next == ']' {
                        break;
                    }
                }
                if consumed.last() != Some(&']') {
                    out.push(c);
                    out.extend(consumed);
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn render_fields(raw: &RawRecord) -> String {
    let mut keys: Vec<&String> = raw.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{k}: {}", raw.get(k).map(Value::to_string).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve a domain adapter implementation by its domain tag (the same
/// `adapter` field used for capability inference). Returns the generic
/// adapter for unrecognized tags rather than failing, since an unknown
/// domain is still renderable.
#[must_use]
pub fn resolve_domain_adapter(domain: &str) -> Box<dyn DomainAdapter> {
    match domain {
        "qa" => Box::new(QaDomainAdapter),
        "intent" => Box::new(IntentDomainAdapter::new(ContextFormat::Null, NumericPrecision::default())),
        "file" => Box::new(FileDomainAdapter),
        _ => Box::new(GenericDomainAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> RawRecord {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn qa_adapter_flattens_question_answer() {
        let adapter = QaDomainAdapter;
        let raw = record(&[
            ("question", json!("city hall phone")),
            ("answer", json!("555-0100")),
            ("confidence", json!(0.9)),
        ]);
        let doc = adapter.format_document(&raw, HashMap::new());
        assert!(doc.content.contains("555-0100"));
        assert_eq!(doc.confidence, 0.9);
    }

    #[test]
    fn qa_adapter_extracts_direct_answer_from_highest_confidence() {
        let adapter = QaDomainAdapter;
        let docs = vec![
            Document { content: "Q: a\nA: low".to_string(), metadata: HashMap::new(), confidence: 0.2 },
            Document { content: "Q: b\nA: 555-0100".to_string(), metadata: HashMap::new(), confidence: 0.9 },
        ];
        assert_eq!(adapter.extract_direct_answer(&docs).as_deref(), Some("555-0100"));
    }

    #[test]
    fn intent_adapter_renders_markdown_table() {
        let adapter = IntentDomainAdapter::new(ContextFormat::MarkdownTable, NumericPrecision::default());
        let raw = record(&[("region", json!("west")), ("total", json!(100))]);
        let doc = adapter.format_document(&raw, HashMap::new());
        assert!(doc.content.starts_with("| region | total |"));
    }

    #[test]
    fn intent_adapter_rounds_floats_to_decimal_places() {
        let adapter = IntentDomainAdapter::new(
            ContextFormat::Csv,
            NumericPrecision { decimal_places: Some(2) },
        );
        let raw = record(&[("total", json!(100.12345))]);
        let doc = adapter.format_document(&raw, HashMap::new());
        assert!(doc.content.contains("100.12"));
    }

    #[test]
    fn file_adapter_strips_citation_markers() {
        let adapter = FileDomainAdapter;
        let docs = vec![Document {
            content: "Revenue grew 12%[1] in Q4[2].".to_string(),
            metadata: HashMap::new(),
            confidence: 1.0,
        }];
        let filtered = adapter.apply_domain_specific_filtering(docs, "revenue");
        assert_eq!(filtered[0].content, "Revenue grew 12% in Q4.");
    }

    #[test]
    fn resolve_domain_adapter_falls_back_to_generic() {
        let adapter = resolve_domain_adapter("unknown-domain");
        let raw = record(&[("k", json!("v"))]);
        let doc = adapter.format_document(&raw, HashMap::new());
        assert_eq!(doc.content, "k: \"v\"");
    }
}
