use axum::{
    extract::rejection::JsonRejection,
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::agents::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Try again in {retry_after} seconds.")]
    RateLimited { retry_after: u64 },

    #[error("{0}")]
    AgentUnavailable(String),

    #[error("Error: {0}")]
    Agent(#[from] AgentError),

    #[error("Template rendering error: {0}")]
    Template(#[from] tera::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Agent(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Agent(_) | AppError::Template(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AppError::Template(_) | AppError::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                "Internal server error".to_string()
            }
            _ if status.is_server_error() => {
                tracing::error!(status = status.as_u16(), error = %self, "Request failed");
                self.to_string()
            }
            _ => {
                tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
                self.to_string()
            }
        };

        let mut response = (status, Json(serde_json::json!({ "detail": detail }))).into_response();
        if let AppError::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}
