//! HTTP-facing error type.
//!
//! Only malformed requests and infrastructure failures are errors. Denied
//! taps and registration conflicts are ordinary results and never pass
//! through here.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use tapgate_core::db::DatabaseError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unacceptable request field, or unparsable body.
    #[error(transparent)]
    BadRequest(#[from] tapgate_core::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Database(e) => {
                error!(error = %e, "Store request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "status": "error", "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
