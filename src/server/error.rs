//! API error type and its JSON response body

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ArchiveError;
use crate::logging::*;
use crate::storage::StorageError;

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
	pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
	pub code: String,
	pub message: String,
}

/// Handler error, mapped to a status code and a JSON body
#[derive(Debug)]
pub enum ApiError {
	/// Malformed request, unsafe key or bad pattern (400)
	Validation(String),
	/// Archive entry or framing is invalid (400)
	InvalidArchive(String),
	/// Body announced gzip but is not gzip (400)
	InvalidGzip(String),
	/// Missing or wrong bearer token (401)
	Unauthorized(String),
	/// Blob not stored (404)
	NotFound(String),
	/// Wrong content type or encoding (415)
	UnsupportedMediaType(String),
	/// Handler deadline exceeded (504)
	Timeout(String),
	/// Anything else (500); the message is logged, not returned
	Internal(String),
}

impl ApiError {
	fn status_and_code(&self) -> (StatusCode, &'static str) {
		match self {
			Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
			Self::InvalidArchive(_) => (StatusCode::BAD_REQUEST, "INVALID_ARCHIVE"),
			Self::InvalidGzip(_) => (StatusCode::BAD_REQUEST, "INVALID_GZIP"),
			Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
			Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
			Self::UnsupportedMediaType(_) => {
				(StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE")
			}
			Self::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
			Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
		}
	}

	fn message(&self) -> &str {
		match self {
			Self::Validation(m)
			| Self::InvalidArchive(m)
			| Self::InvalidGzip(m)
			| Self::Unauthorized(m)
			| Self::NotFound(m)
			| Self::UnsupportedMediaType(m)
			| Self::Timeout(m)
			| Self::Internal(m) => m,
		}
	}
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (_, code) = self.status_and_code();
		write!(f, "{}: {}", code, self.message())
	}
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, code) = self.status_and_code();

		let message = match &self {
			Self::Internal(_) => "An internal error occurred".to_string(),
			other => other.message().to_string(),
		};

		match &self {
			Self::Internal(_) => error!(error = %self, "internal server error"),
			Self::Timeout(_) => warn!(error = %self, "request timed out"),
			_ => debug!(error = %self, "request rejected"),
		}

		let body = ErrorBody { error: ErrorDetail { code: code.to_string(), message } };
		(status, Json(body)).into_response()
	}
}

impl From<StorageError> for ApiError {
	fn from(e: StorageError) -> Self {
		match e {
			StorageError::InvalidKey(v) => ApiError::Validation(v.to_string()),
			StorageError::NotFound { key } => ApiError::NotFound(format!("not found: {}", key)),
			StorageError::Timeout { .. } => ApiError::Timeout(e.to_string()),
			other => ApiError::Internal(other.to_string()),
		}
	}
}

impl From<ArchiveError> for ApiError {
	fn from(e: ArchiveError) -> Self {
		match e {
			ArchiveError::InvalidGzip { .. } => ApiError::InvalidGzip(e.to_string()),
			ArchiveError::InvalidEntryName { .. } | ArchiveError::Corrupt { .. } => {
				ApiError::InvalidArchive(e.to_string())
			}
			other => ApiError::Internal(other.to_string()),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(e: JsonRejection) -> Self {
		ApiError::Validation(e.body_text())
	}
}

impl From<QueryRejection> for ApiError {
	fn from(e: QueryRejection) -> Self {
		ApiError::Validation(e.body_text())
	}
}

impl From<std::io::Error> for ApiError {
	fn from(e: std::io::Error) -> Self {
		ApiError::Internal(e.to_string())
	}
}

impl From<tokio::task::JoinError> for ApiError {
	fn from(e: tokio::task::JoinError) -> Self {
		ApiError::Internal(e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::validation::ValidationError;

	#[test]
	fn test_storage_errors_map_to_status() {
		let invalid: ApiError = StorageError::InvalidKey(ValidationError::PathError("x".into())).into();
		assert_eq!(invalid.status_and_code().0, StatusCode::BAD_REQUEST);

		let missing: ApiError = StorageError::NotFound { key: "u/a".into() }.into();
		assert_eq!(missing.status_and_code().0, StatusCode::NOT_FOUND);

		let timeout: ApiError = StorageError::Timeout { op: "kv get" }.into();
		assert_eq!(timeout.status_and_code().0, StatusCode::GATEWAY_TIMEOUT);
	}

	#[test]
	fn test_gzip_and_tar_errors_have_distinct_codes() {
		let gzip: ApiError = ArchiveError::InvalidGzip { message: "bad".into() }.into();
		let tar: ApiError = ArchiveError::Corrupt { message: "bad".into() }.into();
		assert_eq!(gzip.status_and_code(), (StatusCode::BAD_REQUEST, "INVALID_GZIP"));
		assert_eq!(tar.status_and_code(), (StatusCode::BAD_REQUEST, "INVALID_ARCHIVE"));
	}
}

// vim: ts=4
