//! The single error shape every failure in the client is folded into.
//!
//! # Design
//! Callers never branch on where a failure came from. A refused connection,
//! a 500 with an HTML page, a 400 carrying field errors and a client-side
//! guard all surface as `ApiError { code, message, details }`. The `api` flag
//! only records whether a server response produced it; `kind()` derives the
//! finer classification when a caller does care.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http::Payload;

/// Code used for every failure that produced no usable server response.
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

/// Code used by client-side guards that refuse to issue a request.
pub const PRECONDITION_FAILED: &str = "PRECONDITION_FAILED";

const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

pub type ApiResult<T> = Result<T, ApiError>;

/// Normalized failure of an API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    #[serde(default)]
    api: bool,
    code: String,
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response was received, or it could not be decoded.
    Transport,
    /// The server answered with a non-2xx status.
    Application,
    /// An application error that names offending form fields.
    Validation,
    /// A client-side guard refused to send the request.
    Precondition,
}

/// Errors the server attributes to one named form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors {
    pub name: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ApiError {
    /// Error for a failure with no usable response (network, decode, runtime).
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            api: false,
            code: INTERNAL_SERVER_ERROR.to_string(),
            message: if message.is_empty() {
                FALLBACK_MESSAGE.to_string()
            } else {
                message
            },
            details: None,
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self {
            api: false,
            code: PRECONDITION_FAILED.to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Build the error for a non-2xx response from its decoded body.
    ///
    /// A JSON object body is expected to carry `code`, `message` and
    /// `details`; whatever it omits is filled in from the status line. A text
    /// body becomes the message when it is not blank.
    pub fn from_response(status: u16, payload: Payload) -> Self {
        let (fallback_code, fallback_message) = status_fallback(status);
        match payload {
            Payload::Json(Value::Object(mut body)) => Self {
                api: true,
                code: take_string(&mut body, "code").unwrap_or(fallback_code),
                message: take_string(&mut body, "message").unwrap_or(fallback_message),
                details: body.remove("details").filter(|details| !details.is_null()),
            },
            Payload::Text(text) if !text.trim().is_empty() => Self {
                api: true,
                code: fallback_code,
                message: text.trim().to_string(),
                details: None,
            },
            Payload::Json(_) | Payload::Text(_) => Self {
                api: true,
                code: fallback_code,
                message: fallback_message,
                details: None,
            },
        }
    }

    pub fn is_api(&self) -> bool {
        self.api
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn kind(&self) -> ErrorKind {
        if self.api {
            if self.field_errors().is_empty() {
                ErrorKind::Application
            } else {
                ErrorKind::Validation
            }
        } else if self.code == PRECONDITION_FAILED {
            ErrorKind::Precondition
        } else {
            ErrorKind::Transport
        }
    }

    /// `details.fields`, or an empty list when absent. Malformed entries are
    /// skipped rather than failing the whole list.
    pub fn field_errors(&self) -> Vec<FieldErrors> {
        self.details
            .as_ref()
            .and_then(|details| details.get("fields"))
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|field| serde_json::from_value(field.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Option<String> {
    match body.remove(key)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// `404` becomes `("NOT_FOUND", "Not Found")`; unknown statuses get a
/// generic pair.
fn status_fallback(status: u16) -> (String, String) {
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|status| status.canonical_reason());
    match reason {
        Some(reason) => {
            let code = reason
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            (code, reason.to_string())
        }
        None => (format!("HTTP_{status}"), FALLBACK_MESSAGE.to_string()),
    }
}
