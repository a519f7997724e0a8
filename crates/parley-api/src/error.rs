//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use parley_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] CoreError),
}

impl ApiError {
  /// HTTP status and stable machine-readable code.
  pub fn classify(&self) -> (StatusCode, &'static str) {
    let ApiError::Core(err) = self;
    match err {
      CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
      CoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
      CoreError::AlreadyReviewed(_) => (StatusCode::CONFLICT, "already_reviewed"),
      CoreError::AlreadyRated(_) => (StatusCode::CONFLICT, "already_rated"),
      CoreError::AlreadyDispatched(_) => (StatusCode::CONFLICT, "already_dispatched"),
      CoreError::TargetUnavailable(_) => (StatusCode::CONFLICT, "target_unavailable"),
      CoreError::StaleState { .. } => (StatusCode::PRECONDITION_FAILED, "stale_state"),
      CoreError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
      CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
      CoreError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = self.classify();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
  }
}
