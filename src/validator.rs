//! Normalizes raw provider responses into canonical photo metadata.
//!
//! Vision models return irregular shapes: keywords as arrays or comma strings,
//! classification as a bare label or a structured object, JSON wrapped in
//! markdown fences. The validator is deliberately permissive so partial output
//! still yields a usable result; it only rejects payloads that are not a JSON
//! object at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("response is not parseable JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,
}

/// Classification output: providers return either a free-text label or a
/// structured object with optional fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Classification {
    Label(String),
    Structured {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
}

/// The normalized result of a successful provider run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalMetadata {
    pub caption: String,
    pub description: String,
    /// Provider order preserved for display; deduplication not required.
    pub keywords: Vec<String>,
    pub classification: Option<Classification>,
    /// Opaque provider payloads, passed through without interpretation.
    pub poi_analysis: Option<Value>,
    pub collectible_insights: Option<Value>,
    /// Unrecognized top-level fields, preserved for forward compatibility.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Validate and normalize a raw provider response.
///
/// Accepts the response text as the provider returned it; markdown code
/// fences are stripped before parsing.
pub fn validate(raw: &str) -> Result<CanonicalMetadata, ValidationError> {
    let stripped = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&stripped)?;

    let Value::Object(mut obj) = value else {
        return Err(ValidationError::NotAnObject);
    };

    let caption = take_string(&mut obj, "caption");
    let description = take_string(&mut obj, "description");
    let keywords = obj
        .remove("keywords")
        .map(normalize_keywords)
        .unwrap_or_default();
    let classification = obj.remove("classification").and_then(parse_classification);
    let poi_analysis = take_object(&mut obj, "poiAnalysis");
    let collectible_insights = take_object(&mut obj, "collectibleInsights");

    Ok(CanonicalMetadata {
        caption,
        description,
        keywords,
        classification,
        poi_analysis,
        collectible_insights,
        extra: obj,
    })
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> String {
    match obj.remove(key) {
        Some(Value::String(s)) => s,
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

fn take_object(obj: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match obj.remove(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    }
}

/// Keywords arrive either as an array of strings or as a single
/// comma-separated string. Both normalize to an ordered list with tokens
/// trimmed and empties dropped.
fn normalize_keywords(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => {
                    let s = s.trim().to_string();
                    (!s.is_empty()).then_some(s)
                }
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_classification(value: Value) -> Option<Classification> {
    match value {
        Value::Null => None,
        Value::String(label) => {
            let label = label.trim().to_string();
            (!label.is_empty()).then_some(Classification::Label(label))
        }
        Value::Object(obj) => Some(Classification::Structured {
            kind: obj
                .get("type")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            confidence: obj.get("confidence").and_then(Value::as_f64),
            explanation: obj
                .get("explanation")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        }),
        _ => None,
    }
}

/// Strip a markdown code fence from around a JSON payload, if present.
fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        if let Some(start) = trimmed.find('\n') {
            let after_first_line = &trimmed[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim().to_string();
            }
        }
    }

    trimmed.to_string()
}
