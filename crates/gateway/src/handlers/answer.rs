//! Answer handler

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::AppState;
use astrorag_common::errors::{AppError, Result};
use astrorag_context::AnswerRequest;

const X_CACHE: &str = "x-cache";

/// Decode the body ourselves so malformed requests get the standard error shape
fn decode(body: Value) -> Result<AnswerRequest> {
    serde_json::from_value(body).map_err(|e| {
        let message = e.to_string();
        match message
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
        {
            Some(field) => AppError::MissingField {
                field: field.to_string(),
            },
            None => AppError::Validation {
                message,
                field: None,
            },
        }
    })
}

/// POST /v1/answer
pub async fn answer(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response> {
    let request = decode(body)?;
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|e| AppError::Internal {
            message: format!("request limiter closed: {}", e),
        })?;
    let output = state.pipeline.answer(&request).await?;

    let cache_state = if output.cached { "hit" } else { "miss" };
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (HeaderName::from_static(X_CACHE), HeaderValue::from_static(cache_state)),
        ],
        output.body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_query_is_named() {
        let err = decode(json!({"mode": "natal"})).unwrap_err();
        assert!(matches!(err, AppError::MissingField { ref field } if field == "query"));
        assert_eq!(err.status_code().as_u16(), 400);
    }

    #[test]
    fn test_wrong_type_is_validation_error() {
        let err = decode(json!({"query": 42})).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_minimal_body_decodes() {
        let request = decode(json!({"query": "What is my almuten?"})).unwrap();
        assert_eq!(request.mode, "natal");
    }
}
