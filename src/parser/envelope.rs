use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ClientError;

const MESSAGE_PREVIEW_CHARS: usize = 200;

/// Uniform response shape every dispatched call resolves to:
/// `{ success, message?, data?, errors? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl ApiResponse {
    pub fn ok(data: Option<Value>) -> Self {
        Self { success: true, message: None, data, errors: None }
    }

    /// Failure envelope for screens that render `{success:false, message}`.
    pub fn from_error(err: &ClientError) -> Self {
        let errors = match err {
            ClientError::ServerError { errors, .. } => errors.clone(),
            _ => None,
        };
        Self {
            success: false,
            message: Some(err.user_message()),
            data: None,
            errors,
        }
    }
}

pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        })
        .unwrap_or(false)
}

/// Normalize a 2xx body.
///
/// JSON bodies already shaped as an envelope pass through; any other JSON is
/// wrapped as `data`, and non-JSON text is wrapped as a string.
pub fn parse_success(body: &str, content_type: Option<&str>) -> ApiResponse {
    if is_json_content_type(content_type) {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => return from_json(value),
            Err(e) if !body.trim().is_empty() => {
                warn!(error = %e, "response declared json but failed to parse, wrapping raw text");
            }
            Err(_) => return ApiResponse::ok(None),
        }
    }

    if body.is_empty() {
        ApiResponse::ok(None)
    } else {
        ApiResponse::ok(Some(Value::String(body.to_owned())))
    }
}

fn from_json(value: Value) -> ApiResponse {
    let is_envelope = value
        .as_object()
        .map(|obj| obj.get("success").map(Value::is_boolean).unwrap_or(false))
        .unwrap_or(false);

    if is_envelope {
        match serde_json::from_value::<ApiResponse>(value.clone()) {
            Ok(envelope) => return envelope,
            Err(e) => warn!(error = %e, "envelope-like body did not match, wrapping as data"),
        }
    }
    ApiResponse::ok(Some(value))
}

/// Message and field errors the server attached to a failed response.
pub fn failure_details(
    status: StatusCode,
    body: &str,
    content_type: Option<&str>,
) -> (String, Option<Vec<Value>>) {
    let json = serde_json::from_str::<Value>(body).ok().filter(|_| {
        is_json_content_type(content_type) || body.trim_start().starts_with('{')
    });

    if let Some(json) = json {
        let message = ["message", "error", "msg"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .map(str::to_owned);
        let errors = json.get("errors").and_then(Value::as_array).cloned();
        if let Some(message) = message {
            return (message, errors);
        }
        return (default_message(status), errors);
    }

    let text = body.trim();
    if text.is_empty() {
        (default_message(status), None)
    } else {
        (text.chars().take(MESSAGE_PREVIEW_CHARS).collect(), None)
    }
}

fn default_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("Request failed with status {} ({})", status.as_u16(), reason),
        None => format!("Request failed with status {}", status.as_u16()),
    }
}

/// Token issued by login/register/refresh responses.
pub fn extract_token(response: &ApiResponse) -> Option<String> {
    let from_data = response.data.as_ref().and_then(|data| {
        ["token", "accessToken", "access_token"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_str))
    });
    from_data
        .or_else(|| match &response.data {
            Some(Value::String(token)) if token.split('.').count() == 3 => Some(token.as_str()),
            _ => None,
        })
        .map(str::to_owned)
}

/// Like [`extract_token`] but also looks at top-level `token` fields of a raw body.
pub fn extract_token_from_body(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let envelope = from_json(value.clone());
    extract_token(&envelope).or_else(|| {
        ["token", "accessToken", "access_token"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
    })
}
