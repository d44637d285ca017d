//! Parameter extraction: applying a template parameter's ordered
//! `extraction_patterns` against the user's query, normalizing the
//! captured text, and validating the result.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::constants::extraction::{MAX_PATTERN_LENGTH, MAX_REPETITIONS};
use crate::error::{Error, Result};
use crate::template::{Parameter, ParameterType};

/// Reject patterns that are too long or whose repeated-quantifier count
/// suggests catastrophic backtracking risk, before compiling them.
/// Conservative and cheap: a real ReDoS analyzer is out of scope, but a
/// length cap plus a quantifier-count cap rules out the common
/// nested-repetition constructions (`(a+)+`, `(a*)*`) at template-load
/// time.
fn check_pattern_safety(pattern: &str) -> Result<()> {
    if pattern.len() > MAX_PATTERN_LENGTH {
        return Err(Error::TemplateRenderError {
            template_id: String::new(),
            reason: format!("extraction pattern exceeds {MAX_PATTERN_LENGTH} characters"),
        });
    }
    let quantifier_count = pattern.chars().filter(|c| matches!(c, '+' | '*' | '{')).count();
    if quantifier_count > MAX_REPETITIONS {
        return Err(Error::TemplateRenderError {
            template_id: String::new(),
            reason: format!("extraction pattern has more than {MAX_REPETITIONS} quantifiers"),
        });
    }
    Ok(())
}

/// Compile `pattern` after a safety check, surfacing compile errors as
/// [`Error::TemplateRenderError`] rather than panicking.
fn compile(pattern: &str) -> Result<Regex> {
    check_pattern_safety(pattern)?;
    Regex::new(pattern).map_err(|e| Error::TemplateRenderError {
        template_id: String::new(),
        reason: format!("invalid extraction pattern '{pattern}': {e}"),
    })
}

/// Apply a normalization hint to the raw captured text.
fn normalize(raw: &str, format: Option<&str>, param_type: ParameterType) -> Value {
    let cleaned = match format {
        Some("strip_commas") => raw.replace(',', ""),
        _ => raw.to_string(),
    };
    match param_type {
        ParameterType::Integer => cleaned
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(cleaned)),
        ParameterType::Number => cleaned
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(cleaned)),
        ParameterType::Boolean => cleaned
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(cleaned)),
        _ => Value::String(cleaned),
    }
}

/// Extract every declared parameter from `query`. For each parameter, its
/// `extraction_patterns` are tried in declaration order; the first
/// pattern with a capture group (or whole match, if no group) wins. A
/// missing `required` parameter without a `default` fails with
/// [`Error::MissingParameter`].
pub fn extract_parameters(
    template_id: &str,
    query: &str,
    parameters: &[Parameter],
) -> Result<HashMap<String, Value>> {
    let mut extracted = HashMap::new();

    for param in parameters {
        let mut value = None;
        for pattern in &param.extraction_patterns {
            let regex = compile(pattern)?;
            if let Some(captures) = regex.captures(query) {
                let text = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string());
                if let Some(text) = text {
                    value = Some(normalize(&text, param.format.as_deref(), param.param_type));
                    break;
                }
            }
        }

        let value = match value {
            Some(v) => v,
            None => match &param.default {
                Some(default) => default.clone(),
                None => {
                    if param.required {
                        return Err(Error::MissingParameter {
                            template_id: template_id.to_string(),
                            parameter: param.name.clone(),
                        });
                    }
                    continue;
                }
            },
        };

        extracted.insert(param.name.clone(), value);
    }

    Ok(extracted)
}

/// Validate already-extracted parameters against each declaration's
/// `allowed_values` and numeric `min`/`max` bounds.
pub fn validate_parameters(
    parameters: &[Parameter],
    extracted: &HashMap<String, Value>,
) -> Result<()> {
    for param in parameters {
        let Some(value) = extracted.get(&param.name) else {
            continue;
        };

        if let Some(allowed) = &param.allowed_values {
            if !allowed.contains(value) {
                return Err(Error::ParameterValidationError {
                    parameter: param.name.clone(),
                    reason: format!("value {value} not in allowed_values"),
                });
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = param.min {
                if n < min {
                    return Err(Error::ParameterValidationError {
                        parameter: param.name.clone(),
                        reason: format!("value {n} is below minimum {min}"),
                    });
                }
            }
            if let Some(max) = param.max {
                if n > max {
                    return Err(Error::ParameterValidationError {
                        parameter: param.name.clone(),
                        reason: format!("value {n} is above maximum {max}"),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, required: bool, patterns: Vec<&str>) -> Parameter {
        Parameter {
            name: name.to_string(),
            param_type: ParameterType::String,
            required,
            default: None,
            allowed_values: None,
            extraction_patterns: patterns.into_iter().map(String::from).collect(),
            format: None,
            min: None,
            max: None,
        }
    }

    #[test]
    fn extracts_first_matching_pattern_capture_group() {
        let params = vec![param("department", true, vec![r"in (\w+)"])];
        let extracted =
            extract_parameters("t1", "all employees in Engineering", &params).unwrap();
        assert_eq!(extracted.get("department").unwrap(), "Engineering");
    }

    #[test]
    fn missing_required_parameter_without_default_fails() {
        let params = vec![param("department", true, vec![r"in (\w+)"])];
        let err = extract_parameters("t1", "show me everyone", &params).unwrap_err();
        assert!(matches!(err, Error::MissingParameter { .. }));
    }

    #[test]
    fn missing_optional_parameter_is_skipped() {
        let params = vec![param("department", false, vec![r"in (\w+)"])];
        let extracted = extract_parameters("t1", "show me everyone", &params).unwrap();
        assert!(!extracted.contains_key("department"));
    }

    #[test]
    fn default_is_used_when_extraction_misses() {
        let mut p = param("department", true, vec![r"in (\w+)"]);
        p.default = Some(Value::String("Engineering".to_string()));
        let extracted = extract_parameters("t1", "show me everyone", &[p]).unwrap();
        assert_eq!(extracted.get("department").unwrap(), "Engineering");
    }

    #[test]
    fn strip_commas_normalization_applies_before_numeric_parse() {
        let mut p = Parameter {
            name: "amount".to_string(),
            param_type: ParameterType::Number,
            required: true,
            default: None,
            allowed_values: None,
            extraction_patterns: vec![r"\$([\d,]+)".to_string()],
            format: Some("strip_commas".to_string()),
            min: None,
            max: None,
        };
        p.extraction_patterns = vec![r"\$([\d,]+)".to_string()];
        let extracted = extract_parameters("t1", "total was $12,345", std::slice::from_ref(&p)).unwrap();
        assert_eq!(extracted.get("amount").unwrap().as_f64(), Some(12345.0));
    }

    #[test]
    fn rejects_overlong_extraction_pattern() {
        let long_pattern = "a".repeat(MAX_PATTERN_LENGTH + 1);
        let params = vec![param("x", false, vec![&long_pattern])];
        let err = extract_parameters("t1", "anything", &params).unwrap_err();
        assert!(matches!(err, Error::TemplateRenderError { .. }));
    }

    #[test]
    fn validate_parameters_rejects_value_outside_allowed_values() {
        let mut p = param("status", true, vec![]);
        p.allowed_values = Some(vec![Value::String("open".to_string())]);
        let mut extracted = HashMap::new();
        extracted.insert("status".to_string(), Value::String("closed".to_string()));
        let err = validate_parameters(&[p], &extracted).unwrap_err();
        assert!(matches!(err, Error::ParameterValidationError { .. }));
    }

    #[test]
    fn validate_parameters_rejects_value_below_minimum() {
        let mut p = Parameter {
            name: "limit".to_string(),
            param_type: ParameterType::Integer,
            required: true,
            default: None,
            allowed_values: None,
            extraction_patterns: vec![],
            format: None,
            min: Some(1.0),
            max: None,
        };
        p.min = Some(1.0);
        let mut extracted = HashMap::new();
        extracted.insert("limit".to_string(), Value::from(0));
        let err = validate_parameters(&[p], &extracted).unwrap_err();
        assert!(matches!(err, Error::ParameterValidationError { .. }));
    }
}
