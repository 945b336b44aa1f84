//! Masked request copies for the interpretation audit event
//!
//! Redaction applies only to what is logged. The processing path always
//! works on the caller's original request.

use crate::schema::{AnswerRequest, SubjectProfile};
use astrorag_common::text::truncate_chars;
use serde_json::{json, Value};
use tracing::info;

const AUDIT_QUERY_CHARS: usize = 200;

/// `1990-05-17` becomes `1990-XX-XX`; anything unparseable is fully masked
fn mask_date(date: &str) -> String {
    match date.split_once('-') {
        Some((year, _)) if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) => {
            format!("{}-XX-XX", year)
        }
        _ => "XXXX-XX-XX".to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mask_subject(subject: &SubjectProfile) -> Value {
    json!({
        "date": mask_date(&subject.date),
        "time": subject.time.as_ref().map(|_| "XX:XX"),
        "timezone": subject.timezone,
        "lat": round2(subject.lat),
        "lng": round2(subject.lng),
    })
}

/// Redacted copy of a request, safe for logs
pub fn mask_request(request: &AnswerRequest) -> Value {
    json!({
        "query": truncate_chars(&request.query, AUDIT_QUERY_CHARS),
        "mode": request.mode,
        "locale": request.locale.locale.as_str(),
        "user_level": request.locale.user_level.as_str(),
        "subject_profile": request.subject_profile.as_ref().map(mask_subject),
        "constraints": {
            "max_latency_ms": request.constraints.max_latency_ms,
            "max_tokens": request.constraints.max_tokens,
        },
        "ab_profile": request.ab_flags.profile.as_str(),
    })
}

/// Outcome fields attached to the audit event
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    pub latency_ms: f64,
    pub cached: bool,
    pub coverage_ok: Option<bool>,
    pub coverage_score: Option<f64>,
    pub confidence: Option<f64>,
    pub degrade_active: bool,
}

pub fn emit_audit(request: &AnswerRequest, record: &AuditRecord) {
    info!(
        event = "interpretation_audit",
        request = %mask_request(request),
        latency_ms = record.latency_ms,
        cached = record.cached,
        coverage_ok = ?record.coverage_ok,
        coverage_score = ?record.coverage_score,
        confidence = ?record.confidence,
        degrade_active = record.degrade_active,
        "interpretation_audit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_birth_data() {
        let mut request = AnswerRequest::new("x".repeat(300));
        request.subject_profile = Some(SubjectProfile {
            date: "1990-05-17".to_string(),
            time: Some("14:35".to_string()),
            timezone: "Europe/Istanbul".to_string(),
            lat: 41.008_24,
            lng: 28.978_36,
        });

        let masked = mask_request(&request);
        assert_eq!(masked["subject_profile"]["date"], "1990-XX-XX");
        assert_eq!(masked["subject_profile"]["time"], "XX:XX");
        assert_eq!(masked["subject_profile"]["lat"], 41.01);
        assert_eq!(masked["subject_profile"]["lng"], 28.98);
        assert_eq!(masked["query"].as_str().unwrap().chars().count(), AUDIT_QUERY_CHARS);

        // processing copy untouched
        assert_eq!(request.subject_profile.unwrap().date, "1990-05-17");
    }

    #[test]
    fn test_unparseable_date_fully_masked() {
        assert_eq!(mask_date("17/05/1990"), "XXXX-XX-XX");
        assert_eq!(mask_date(""), "XXXX-XX-XX");
    }
}
