// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use reqwest::StatusCode;

/// Errors raised by SCM connectors.
///
/// Messages carry the remote status and operation, never tokens or secrets.
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
	#[error("network error during {operation}: {message}")]
	Network { operation: &'static str, message: String },

	#[error("{operation} timed out")]
	Timeout { operation: &'static str },

	#[error("unauthorized during {operation}")]
	Unauthorized { operation: &'static str },

	#[error("not found: {0}")]
	NotFound(String),

	#[error("rate limited during {operation}")]
	RateLimited { operation: &'static str },

	#[error("{operation} failed with status {status}: {message}")]
	Api {
		operation: &'static str,
		status: u16,
		message: String,
	},

	#[error("invalid response during {operation}: {message}")]
	InvalidResponse { operation: &'static str, message: String },

	#[error("token refresh failed: {0}")]
	TokenRefreshFailed(String),

	#[error("webhook setup failed: {0}")]
	WebhookSetupFailed(String),

	#[error("webhook not found: {0}")]
	WebhookNotFound(String),

	#[error("invalid webhook payload: {0}")]
	InvalidPayload(String),

	#[error("operation not supported by {kind}: {operation}")]
	Unsupported { kind: &'static str, operation: &'static str },

	#[error("connector configuration error: {0}")]
	Config(String),
}

impl ScmError {
	pub(crate) fn from_reqwest(operation: &'static str, e: reqwest::Error) -> Self {
		if e.is_timeout() {
			ScmError::Timeout { operation }
		} else if e.is_decode() {
			ScmError::InvalidResponse {
				operation,
				message: e.to_string(),
			}
		} else {
			// reqwest errors can embed the request URL, which may carry credentials
			ScmError::Network {
				operation,
				message: e.without_url().to_string(),
			}
		}
	}

	pub(crate) fn from_status(operation: &'static str, status: StatusCode, message: String) -> Self {
		match status {
			StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if message.to_lowercase().contains("rate limit") => {
				ScmError::RateLimited { operation }
			}
			StatusCode::UNAUTHORIZED => ScmError::Unauthorized { operation },
			StatusCode::NOT_FOUND => ScmError::NotFound(format!("{operation}: {message}")),
			StatusCode::TOO_MANY_REQUESTS => ScmError::RateLimited { operation },
			_ => ScmError::Api {
				operation,
				status: status.as_u16(),
				message,
			},
		}
	}

	/// Transient remote failures an operator may retry.
	pub fn is_transient(&self) -> bool {
		match self {
			ScmError::Network { .. } | ScmError::Timeout { .. } | ScmError::RateLimited { .. } => true,
			ScmError::Api { status, .. } => *status >= 500,
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, ScmError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		assert!(matches!(
			ScmError::from_status("fetch_tags", StatusCode::UNAUTHORIZED, String::new()),
			ScmError::Unauthorized { .. }
		));
		assert!(matches!(
			ScmError::from_status("fetch_tags", StatusCode::FORBIDDEN, "API rate limit exceeded".into()),
			ScmError::RateLimited { .. }
		));
		assert!(matches!(
			ScmError::from_status("fetch_tags", StatusCode::NOT_FOUND, "missing".into()),
			ScmError::NotFound(_)
		));

		let api = ScmError::from_status("fetch_tags", StatusCode::BAD_GATEWAY, "bad gateway".into());
		assert!(api.is_transient());
		assert_eq!(api.to_string(), "fetch_tags failed with status 502: bad gateway");
	}

	#[test]
	fn test_verification_failures_are_not_transient() {
		assert!(!ScmError::InvalidPayload("x".into()).is_transient());
		assert!(!ScmError::Unauthorized { operation: "x" }.is_transient());
	}
}
