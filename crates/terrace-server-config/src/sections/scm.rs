// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ScmConfig {
	/// Public base URL SCM hosts deliver webhooks to.
	pub webhook_base_url: String,
	pub request_timeout_secs: u64,
	pub archive_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScmConfigLayer {
	#[serde(default)]
	pub webhook_base_url: Option<String>,
	#[serde(default)]
	pub request_timeout_secs: Option<u64>,
	#[serde(default)]
	pub archive_timeout_secs: Option<u64>,
}

impl ScmConfigLayer {
	pub fn merge(&mut self, other: ScmConfigLayer) {
		if other.webhook_base_url.is_some() {
			self.webhook_base_url = other.webhook_base_url;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.archive_timeout_secs.is_some() {
			self.archive_timeout_secs = other.archive_timeout_secs;
		}
	}

	pub fn finalize(self, http_base_url: &str) -> ScmConfig {
		ScmConfig {
			webhook_base_url: self
				.webhook_base_url
				.map(|u| u.trim_end_matches('/').to_string())
				.unwrap_or_else(|| http_base_url.to_string()),
			request_timeout_secs: self.request_timeout_secs.unwrap_or(30),
			archive_timeout_secs: self.archive_timeout_secs.unwrap_or(300),
		}
	}
}
