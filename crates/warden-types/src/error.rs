//! Error type shared across the Warden crates.
//!
//! One hand-rolled enum instead of per-module error types: adapters map
//! their backend failures onto it, the core propagates it, and the HTTP
//! layer renders it as a JSON error envelope without leaking internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub type WdResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	NotFound,
	PermissionDenied,
	Unauthorized,
	ValidationError(String),
	DbError,
	ServiceUnavailable(String),
	Internal(Box<str>),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::PermissionDenied => write!(f, "permission denied"),
			Error::Unauthorized => write!(f, "unauthorized"),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::DbError => write!(f, "database error"),
			Error::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let (status, code, message) = match self {
			Error::NotFound => (StatusCode::NOT_FOUND, "E-NOT-FOUND", "Not found".to_string()),
			Error::PermissionDenied => {
				(StatusCode::FORBIDDEN, "E-PERMISSION", "Permission denied".to_string())
			}
			Error::Unauthorized => {
				(StatusCode::UNAUTHORIZED, "E-UNAUTHORIZED", "Unauthorized".to_string())
			}
			Error::ValidationError(msg) => (StatusCode::BAD_REQUEST, "E-VALIDATION", msg),
			// Internal detail stays in the logs, not in the response body
			Error::DbError | Error::Internal(_) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "E-INTERNAL", "Internal error".to_string())
			}
			Error::ServiceUnavailable(_) => (
				StatusCode::SERVICE_UNAVAILABLE,
				"E-UNAVAILABLE",
				"Service temporarily unavailable".to_string(),
			),
		};

		let body = serde_json::json!({
			"error": {
				"code": code,
				"message": message
			}
		});

		(status, Json(body)).into_response()
	}
}


// vim: ts=4
