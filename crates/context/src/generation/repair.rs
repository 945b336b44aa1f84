//! Backend output repair and schema validation
//!
//! Repair never fails: unparseable output is wrapped into a valid skeleton
//! flagged with a high hallucination risk. Validation is a separate step so
//! the caller decides what a schema failure means.

use crate::schema::{AnswerLimits, AnswerPayload};
use astrorag_common::errors::{AppError, Result};
use serde_json::{json, Map, Value};

/// Repaired backend output
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedOutput {
    pub value: Value,
    /// Set when the raw output was not a JSON object
    pub repair_note: Option<String>,
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn skeleton(raw: &str) -> Value {
    json!({
        "answer": { "general_profile": raw.trim() },
        "citations": [],
        "confidence": 0.0,
        "limits": { "coverage_ok": false, "hallucination_risk": "high" },
    })
}

fn default_limits() -> Map<String, Value> {
    match serde_json::to_value(AnswerLimits::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn fill_answer(answer: Value) -> Value {
    let mut body = match answer {
        Value::Object(map) => map,
        Value::String(text) => {
            let mut map = Map::new();
            map.insert("general_profile".into(), Value::String(text));
            map
        }
        _ => Map::new(),
    };
    body.entry("general_profile").or_insert_with(|| json!(""));
    for list in ["strengths", "watchouts", "timing", "secondary_refs"] {
        let entry = body.entry(list).or_insert_with(|| json!([]));
        if !entry.is_array() {
            *entry = json!([]);
        }
    }
    Value::Object(body)
}

fn fill_citation(index: usize, citation: Value) -> Option<Value> {
    let Value::Object(mut map) = citation else {
        return None;
    };
    let doc_id = map.get("doc_id").and_then(Value::as_str)?.to_string();
    map.entry("n").or_insert_with(|| json!(index + 1));
    map.entry("id").or_insert_with(|| json!(doc_id));
    for locator in ["section", "line_start", "line_end"] {
        map.entry(locator).or_insert_with(|| json!(0));
    }
    Some(Value::Object(map))
}

/// Coerce raw backend text into the answer shape
pub fn repair_output(raw: &str) -> RepairedOutput {
    let parsed = match serde_json::from_str::<Value>(strip_fences(raw)) {
        Ok(Value::Object(map)) => map,
        _ => {
            return RepairedOutput {
                value: skeleton(raw),
                repair_note: Some("invalid_json".to_string()),
            }
        }
    };

    let mut map = parsed;
    let answer = map.remove("answer").unwrap_or_else(|| json!({}));
    map.insert("answer".into(), fill_answer(answer));

    let citations = match map.remove("citations") {
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| fill_citation(i, c))
            .collect(),
        _ => Vec::new(),
    };
    map.insert("citations".into(), Value::Array(citations));

    if !map.get("confidence").is_some_and(Value::is_number) {
        map.insert("confidence".into(), json!(0.0));
    }

    let mut limits = default_limits();
    if let Some(Value::Object(given)) = map.remove("limits") {
        limits.extend(given);
    }
    map.insert("limits".into(), Value::Object(limits));
    map.entry("evidence_summary").or_insert_with(|| json!({}));

    RepairedOutput {
        value: Value::Object(map),
        repair_note: None,
    }
}

/// Deserialize repaired output into the typed payload
pub fn validate_payload(value: &Value) -> Result<AnswerPayload> {
    serde_json::from_value(value.clone()).map_err(|e| AppError::SchemaRepair {
        message: e.to_string(),
    })
}
