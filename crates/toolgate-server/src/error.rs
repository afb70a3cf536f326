//! Unified error handling for the API
//!
//! Every error leaves the gateway as an OpenAI-style body so existing client
//! SDKs surface the message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use toolgate_core::GatewayError;

/// API error response body
#[derive(Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Serialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, kind: &str, code: &str) -> Self {
        Self {
            error: ApiErrorDetail {
                message: message.into(),
                kind: kind.to_string(),
                code: code.to_string(),
            },
        }
    }
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Gateway(GatewayError),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Gateway(GatewayError::BackendUnavailable(_))
            | AppError::Gateway(GatewayError::MalformedBackendResponse(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Gateway(GatewayError::BackendStatus { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Gateway(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ApiError {
        match self {
            AppError::Unauthorized(msg) => {
                ApiError::new(msg.clone(), "authentication_error", "invalid_api_key")
            }
            AppError::BadRequest(msg) => {
                ApiError::new(msg.clone(), "invalid_request_error", "bad_request")
            }
            AppError::NotFound(msg) => ApiError::new(msg.clone(), "invalid_request_error", "not_found"),
            AppError::Gateway(err) => ApiError::new(err.to_string(), "gateway_error", err.kind()),
            AppError::Internal(msg) => ApiError::new(msg.clone(), "server_error", "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = ?self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log full error chain for debugging, return sanitized message to client
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_bad_gateway() {
        let err = AppError::from(GatewayError::BackendUnavailable("refused".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.body().error.code, "backend_unavailable");

        let err = AppError::from(GatewayError::MalformedBackendResponse("x".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn backend_status_passes_through() {
        let err = AppError::from(GatewayError::BackendStatus {
            status: 429,
            message: "slow down".into(),
        });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn body_uses_openai_shape() {
        let body = serde_json::to_value(AppError::Unauthorized("nope".into()).body()).unwrap();
        assert_eq!(body["error"]["message"], "nope");
        assert_eq!(body["error"]["type"], "authentication_error");
    }
}
