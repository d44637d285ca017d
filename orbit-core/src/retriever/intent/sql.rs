//! SQL rendering: binds extracted parameters into a parameterized
//! statement. Parameters are always passed as bound values; the only way
//! a parameter can influence the statement's identifiers (table/column
//! names) is through a declared `allowed_values` set, checked before
//! rendering so an attacker-controlled value can never reach string
//! concatenation into the SQL text.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::{Parameter, QueryBody, Template};

/// A statement plus its positionally/named-bound parameter values, ready
/// to hand to a [`super::DatasourceClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub statement: String,
    pub bound_params: HashMap<String, Value>,
}

/// Render `template`'s SQL body against `extracted`, rejecting any
/// extracted parameter that is not bound as a value (i.e. one a caller
/// tried to splice into the statement text directly).
pub fn render(template: &Template, extracted: &HashMap<String, Value>) -> Result<BoundStatement> {
    let QueryBody::Sql { sql } = &template.body else {
        return Err(Error::TemplateRenderError {
            template_id: template.id.clone(),
            reason: "render::sql called on a non-SQL template".to_string(),
        });
    };

    let mut bound_params = HashMap::new();
    for param in &template.parameters {
        if let Some(value) = extracted.get(&param.name) {
            check_identifier_safety(param, value, &template.id)?;
            bound_params.insert(param.name.clone(), value.clone());
        }
    }

    Ok(BoundStatement {
        statement: sql.clone(),
        bound_params,
    })
}

/// A parameter is only safe to use where the template would splice it as
/// an identifier (rather than bind it as a value) when its declared
/// `allowed_values` constrains it to a fixed, known set. Every other
/// parameter is assumed to be bound normally, which this function does
/// not need to police; it exists to catch the case where a template
/// author declared no `allowed_values` yet the rendered statement implies
/// identifier interpolation via a `format`-flagged parameter.
fn check_identifier_safety(param: &Parameter, value: &Value, template_id: &str) -> Result<()> {
    let wants_identifier_interpolation = param.format.as_deref() == Some("identifier");
    if wants_identifier_interpolation {
        match &param.allowed_values {
            Some(allowed) if allowed.contains(value) => Ok(()),
            _ => Err(Error::TemplateRenderError {
                template_id: template_id.to_string(),
                reason: format!(
                    "parameter '{}' requests identifier interpolation without a matching allowed_values entry",
                    param.name
                ),
            }),
        }
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ParameterType, ResultFormat};
    use serde_json::json;

    fn template(sql: &str, params: Vec<Parameter>) -> Template {
        Template {
            id: "t1".to_string(),
            version: "1".to_string(),
            description: String::new(),
            nl_examples: vec!["x".to_string()],
            semantic_tags: Vec::new(),
            parameters: params,
            body: QueryBody::Sql { sql: sql.to_string() },
            result_format: ResultFormat::default(),
            display_fields: Vec::new(),
            tags: Vec::new(),
            timeout_secs: None,
        }
    }

    fn param(name: &str) -> Parameter {
        Parameter {
            name: name.to_string(),
            param_type: ParameterType::String,
            required: true,
            default: None,
            allowed_values: None,
            extraction_patterns: Vec::new(),
            format: None,
            min: None,
            max: None,
        }
    }

    #[test]
    fn renders_bound_params_without_splicing_into_statement_text() {
        let t = template(
            "SELECT * FROM city WHERE department = :department",
            vec![param("department")],
        );
        let mut extracted = HashMap::new();
        extracted.insert("department".to_string(), json!("Engineering; DROP TABLE city"));

        let bound = render(&t, &extracted).unwrap();
        assert_eq!(bound.statement, "SELECT * FROM city WHERE department = :department");
        assert_eq!(bound.bound_params["department"], json!("Engineering; DROP TABLE city"));
    }

    #[test]
    fn identifier_interpolation_requires_allowed_values_match() {
        let mut p = param("sort_column");
        p.format = Some("identifier".to_string());
        p.allowed_values = Some(vec![json!("name"), json!("population")]);
        let t = template("SELECT * FROM city ORDER BY :sort_column", vec![p]);

        let mut extracted = HashMap::new();
        extracted.insert("sort_column".to_string(), json!("name; DROP TABLE city"));
        let err = render(&t, &extracted).unwrap_err();
        assert!(matches!(err, Error::TemplateRenderError { .. }));
    }

    #[test]
    fn identifier_interpolation_succeeds_for_allowed_value() {
        let mut p = param("sort_column");
        p.format = Some("identifier".to_string());
        p.allowed_values = Some(vec![json!("name"), json!("population")]);
        let t = template("SELECT * FROM city ORDER BY :sort_column", vec![p]);

        let mut extracted = HashMap::new();
        extracted.insert("sort_column".to_string(), json!("population"));
        assert!(render(&t, &extracted).is_ok());
    }
}
