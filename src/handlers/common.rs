use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// `{success: false, message}` body used by the storefront-facing endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBody {
    pub success: bool,
    pub message: String,
}

/// Renders a service error in the storefront failure shape
#[derive(Debug)]
pub struct StorefrontError(pub ServiceError);

impl From<ServiceError> for StorefrontError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for StorefrontError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ServiceError::ValidationError(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for StorefrontError {
    fn into_response(self) -> Response {
        let message = match self.0 {
            ServiceError::NotFound(ref msg) => msg.clone(),
            ref other => other.response_message(),
        };
        failure_response(self.0.status_code(), message)
    }
}

pub fn failure_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(FailureBody {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}
