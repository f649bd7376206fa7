// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error response helpers shared by the HTTP handlers.
//!
//! Every error body has the shape `{"error": <code>, "message": <text>}`.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl ErrorResponse {
	pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: message.into(),
		}
	}
}

/// Create a 400 Bad Request response.
pub fn bad_request(error: impl Into<String>, message: impl Into<String>) -> ApiError {
	(StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error, message)))
}

/// Create a 401 Unauthorized response.
pub fn unauthorized(error: impl Into<String>, message: impl Into<String>) -> ApiError {
	(StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(error, message)))
}

/// Create a 404 Not Found response.
pub fn not_found(message: impl Into<String>) -> ApiError {
	(StatusCode::NOT_FOUND, Json(ErrorResponse::new("not_found", message)))
}

/// Create a 409 Conflict response.
pub fn conflict(error: impl Into<String>, message: impl Into<String>) -> ApiError {
	(StatusCode::CONFLICT, Json(ErrorResponse::new(error, message)))
}

/// Create a 500 Internal Server Error response.
pub fn internal_error(message: impl Into<String>) -> ApiError {
	(
		StatusCode::INTERNAL_SERVER_ERROR,
		Json(ErrorResponse::new("internal_error", message)),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_helpers_set_status_and_code() {
		let (status, Json(body)) = bad_request("invalid_payload", "bad json");
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body, ErrorResponse::new("invalid_payload", "bad json"));

		let (status, Json(body)) = not_found("webhook not found");
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body.error, "not_found");

		assert_eq!(unauthorized("a", "b").0, StatusCode::UNAUTHORIZED);
		assert_eq!(conflict("a", "b").0, StatusCode::CONFLICT);
		assert_eq!(internal_error("boom").1.error, "internal_error");
	}
}
