//! Request executor: one call in, one `Result<Payload, ApiError>` out.
//!
//! # Design
//! Execution is split the same way as the transport types: `build_request`
//! turns a `RequestDescriptor` into an `HttpRequest` and `parse_response`
//! turns an `HttpResponse` into a payload or an `ApiError`. Both are pure.
//! `execute` glues them around a `Transport` and adds the two side effects
//! the UI relies on: logging and the optional error notification.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Payload};
use crate::notify::{Notification, Notifier};
use crate::transport::Transport;

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Emit an error notification when the call fails.
    pub notify: bool,
    /// Extra headers; these override the defaults the executor sets.
    pub headers: Vec<(String, String)>,
}

/// Everything needed to issue one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn notify(mut self, notify: bool) -> Self {
        self.options.notify = notify;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.push((name.into(), value.into()));
        self
    }
}

/// Issues API calls against one base URL.
///
/// Cheap to clone; clones share the transport (and so its cookie jar).
#[derive(Clone)]
pub struct RequestExecutor {
    base_url: String,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
}

impl RequestExecutor {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn build_request(&self, descriptor: &RequestDescriptor) -> ApiResult<HttpRequest> {
        if descriptor.path.is_empty() {
            return Err(ApiError::internal("request path must not be empty"));
        }
        let url = if descriptor.path.starts_with('/') {
            format!("{}{}", self.base_url, descriptor.path)
        } else {
            format!("{}/{}", self.base_url, descriptor.path)
        };

        let mut headers = Vec::new();
        let body = match &descriptor.body {
            Some(body) => {
                headers.push(("content-type".to_string(), "application/json".to_string()));
                Some(serde_json::to_string(body).map_err(|e| ApiError::internal(e.to_string()))?)
            }
            None => None,
        };
        for (name, value) in &descriptor.options.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        Ok(HttpRequest {
            method: descriptor.method,
            url,
            headers,
            body,
        })
    }

    /// Decode the body by content type, then split on the status.
    pub fn parse_response(response: HttpResponse) -> ApiResult<Payload> {
        let payload = if response.is_json() {
            let value = serde_json::from_str(&response.body)
                .map_err(|e| ApiError::internal(format!("invalid JSON response: {e}")))?;
            Payload::Json(value)
        } else {
            Payload::Text(response.body)
        };

        if (200..300).contains(&response.status) {
            Ok(payload)
        } else {
            Err(ApiError::from_response(response.status, payload))
        }
    }

    pub async fn execute(&self, descriptor: RequestDescriptor) -> ApiResult<Payload> {
        debug!(
            method = %descriptor.method,
            path = %descriptor.path,
            notify = descriptor.options.notify,
            "API request"
        );

        let result = self.send(&descriptor).await;
        if let Err(err) = &result {
            error!(
                method = %descriptor.method,
                path = %descriptor.path,
                code = err.code(),
                detail = err.message(),
                "API error"
            );
            if descriptor.options.notify {
                self.notifier.notify(Notification::error(err.message()));
            }
        }
        result
    }

    /// `execute`, then decode a JSON payload into `T`.
    pub async fn execute_json<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> ApiResult<T> {
        match self.execute(descriptor).await? {
            Payload::Json(value) => {
                serde_json::from_value(value).map_err(|e| ApiError::internal(format!("unexpected response shape: {e}")))
            }
            Payload::Text(_) => Err(ApiError::internal("expected a JSON response")),
        }
    }

    async fn send(&self, descriptor: &RequestDescriptor) -> ApiResult<Payload> {
        let request = self.build_request(descriptor)?;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        Self::parse_response(response)
    }
}
