//! HTTP rendering: substitutes extracted parameters into a template's
//! `endpoint_template`, `headers`, and optional `body_template`.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::{QueryBody, Template};

/// A fully rendered HTTP request, ready to hand to a [`super::DatasourceClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Substitute `{name}`-style placeholders in `text` with `extracted`
/// values, URL-encoding each substitution. Fails with
/// [`Error::TemplateRenderError`] on any placeholder not present in
/// `extracted`, matching the strict-rendering contract the SQL and query-
/// DSL renderers share.
fn substitute(text: &str, extracted: &HashMap<String, Value>, template_id: &str, url_encode: bool) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, c2) in chars.by_ref() {
            if c2 == '}' {
                closed = true;
                break;
            }
            name.push(c2);
        }
        if !closed {
            return Err(Error::TemplateRenderError {
                template_id: template_id.to_string(),
                reason: "unterminated '{' in HTTP template".to_string(),
            });
        }
        let value = extracted.get(&name).ok_or_else(|| Error::TemplateRenderError {
            template_id: template_id.to_string(),
            reason: format!("undeclared placeholder '{{{name}}}' in HTTP template"),
        })?;
        let rendered = value_to_string(value);
        out.push_str(&if url_encode { urlencode(&rendered) } else { rendered });
    }
    Ok(out)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Render `template`'s HTTP body against `extracted`.
pub fn render(template: &Template, extracted: &HashMap<String, Value>) -> Result<RenderedRequest> {
    let QueryBody::Http { method, endpoint_template, headers, body_template } = &template.body else {
        return Err(Error::TemplateRenderError {
            template_id: template.id.clone(),
            reason: "render::http called on a non-HTTP template".to_string(),
        });
    };

    let url = substitute(endpoint_template, extracted, &template.id, true)?;

    let mut rendered_headers = HashMap::with_capacity(headers.len());
    for (key, value) in headers {
        rendered_headers.insert(key.clone(), substitute(value, extracted, &template.id, false)?);
    }

    let body = body_template
        .as_ref()
        .map(|b| render_body_value(b, extracted, &template.id))
        .transpose()?;

    Ok(RenderedRequest {
        method: method.clone(),
        url,
        headers: rendered_headers,
        body,
    })
}

fn render_body_value(value: &Value, extracted: &HashMap<String, Value>, template_id: &str) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                // Whole-value placeholder preserves the extracted value's
                // original JSON type instead of stringifying it.
                return extracted.get(name).cloned().ok_or_else(|| Error::TemplateRenderError {
                    template_id: template_id.to_string(),
                    reason: format!("undeclared placeholder '{{{name}}}' in HTTP body"),
                });
            }
            Ok(Value::String(substitute(s, extracted, template_id, false)?))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_body_value(v, extracted, template_id)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_body_value(item, extracted, template_id)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}
