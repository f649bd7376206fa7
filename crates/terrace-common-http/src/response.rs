// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Helpers for turning failed remote responses into loggable messages.

use reqwest::Response;
use tracing::debug;

/// Upper bound on how much of a remote error body is carried into error text.
pub const MAX_ERROR_BODY_LEN: usize = 512;

/// Read a failed response body as a short message.
///
/// Remote bodies can be large HTML error pages; only the first
/// [`MAX_ERROR_BODY_LEN`] characters are kept.
pub async fn error_message(response: Response) -> String {
	let status = response.status();
	match response.text().await {
		Ok(body) if !body.trim().is_empty() => truncate(body.trim()),
		Ok(_) => status
			.canonical_reason()
			.unwrap_or("unknown error")
			.to_string(),
		Err(e) => {
			debug!(error = %e, "failed to read error body");
			status
				.canonical_reason()
				.unwrap_or("unknown error")
				.to_string()
		}
	}
}

fn truncate(body: &str) -> String {
	if body.chars().count() <= MAX_ERROR_BODY_LEN {
		return body.to_string();
	}
	let mut out: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
	out.push('…');
	out
}
