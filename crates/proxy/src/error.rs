//! API error type mapping [`RelayError`] variants to schema-aware HTTP
//! error envelopes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_types::{InboundSchema, RelayError};
use serde_json::{Value, json};

/// Wrapper around [`RelayError`] carrying the inbound schema so the
/// envelope matches what the client speaks.
///
/// OpenAI and Anthropic clients receive `{"error": {"message", "type",
/// "code"?}}`; Ollama clients receive `{"error": "<message>"}`.
pub struct ApiError {
    pub schema: InboundSchema,
    pub error: RelayError,
}

impl ApiError {
    #[must_use]
    pub fn new(schema: InboundSchema, error: RelayError) -> Self {
        Self { schema, error }
    }

    #[must_use]
    pub fn openai(error: RelayError) -> Self {
        Self::new(InboundSchema::OpenAi, error)
    }

    fn envelope(&self, message: &str, error_type: &str, code: Option<&str>) -> Value {
        match self.schema {
            InboundSchema::Ollama => json!({"error": message}),
            _ => {
                let mut inner = json!({"message": message, "type": error_type});
                if let Some(code) = code {
                    inner["code"] = json!(code);
                }
                json!({"error": inner})
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.error {
            RelayError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                self.envelope(msg, "invalid_request_error", None),
            ),
            RelayError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                self.envelope(
                    "no credentials available; authenticate and retry",
                    "invalid_request_error",
                    Some("invalid_api_key"),
                ),
            ),
            RelayError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                self.envelope(msg, "invalid_request_error", Some("invalid_api_key")),
            ),
            RelayError::Upstream { status, body } => {
                if *status == 401 {
                    (
                        StatusCode::UNAUTHORIZED,
                        self.envelope(
                            "upstream rejected the credential; re-authenticate and retry",
                            "upstream_error",
                            Some("invalid_api_key"),
                        ),
                    )
                } else if let Ok(json_body) = serde_json::from_str::<Value>(body) {
                    // Forward upstream status and body when it parses.
                    let code =
                        StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                    (code, json_body)
                } else {
                    (
                        StatusCode::BAD_GATEWAY,
                        self.envelope(
                            &format!("upstream error (status {status}): {body}"),
                            "upstream_error",
                            None,
                        ),
                    )
                }
            }
            RelayError::Http(msg) => (
                StatusCode::BAD_GATEWAY,
                self.envelope(msg, "upstream_error", None),
            ),
            RelayError::Parse(msg) => (
                StatusCode::BAD_GATEWAY,
                self.envelope(msg, "parse_error", None),
            ),
            // The client is gone; the status is a formality.
            RelayError::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_GATEWAY),
                self.envelope("request cancelled", "upstream_error", None),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.envelope(&other.to_string(), "api_error", None),
            ),
        };
        (status, Json(body)).into_response()
    }
}
