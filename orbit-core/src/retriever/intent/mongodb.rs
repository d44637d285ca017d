//! MongoDB aggregation-pipeline rendering: binds extracted parameters
//! into a template's `query_dsl` array of pipeline stages. Shares its
//! placeholder-binding rules with [`super::elasticsearch`] since both
//! backends declare the same JSON `query_dsl` body shape.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::retriever::intent::elasticsearch::bind;
use crate::template::{QueryBody, Template};

/// Render `template`'s aggregation pipeline against `extracted`. The
/// pipeline must be declared as a JSON array; anything else is a
/// template-authoring error caught here rather than at execution time.
pub fn render(template: &Template, extracted: &HashMap<String, Value>) -> Result<Vec<Value>> {
    let QueryBody::QueryDsl { query_dsl } = &template.body else {
        return Err(Error::TemplateRenderError {
            template_id: template.id.clone(),
            reason: "render::mongodb called on a non-query-dsl template".to_string(),
        });
    };
    let Value::Array(stages) = query_dsl else {
        return Err(Error::TemplateRenderError {
            template_id: template.id.clone(),
            reason: "mongodb query_dsl must be a pipeline array".to_string(),
        });
    };
    stages
        .iter()
        .map(|stage| bind(stage, extracted, &template.id))
        .collect()
}
