// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use terrace_common_secret::SecretString;
use terrace_server_db::ScmKind;

/// Byte stream of a source archive. The caller owns it and drops it to close
/// the underlying connection.
pub type ArchiveStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	pub page: u32,
	pub page_size: u32,
}

impl Pagination {
	pub const MAX_PAGE_SIZE: u32 = 100;

	pub fn new(page: u32, page_size: u32) -> Self {
		Self {
			page: page.max(1),
			page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
		}
	}

	/// Zero-based offset of the first item on this page.
	pub fn offset(&self) -> u32 {
		(self.page.max(1) - 1) * self.page_size
	}

	pub fn next(&self) -> Self {
		Self::new(self.page + 1, self.page_size)
	}
}

impl Default for Pagination {
	fn default() -> Self {
		Self::new(1, 30)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
	pub items: Vec<T>,
	pub more_pages: bool,
}

impl<T> Page<T> {
	pub fn new(items: Vec<T>, more_pages: bool) -> Self {
		Self { items, more_pages }
	}

	/// Slice a complete result set into one page.
	pub fn from_all(mut all: Vec<T>, pagination: Pagination) -> Self {
		let start = (pagination.offset() as usize).min(all.len());
		let end = (start + pagination.page_size as usize).min(all.len());
		let more_pages = end < all.len();
		let items = all.drain(start..end).collect();
		Self { items, more_pages }
	}
}

/// Result of an OAuth code exchange or refresh.
#[derive(Clone)]
pub struct AccessToken {
	pub access: SecretString,
	pub refresh: Option<SecretString>,
	pub token_type: String,
	pub expires_at: Option<DateTime<Utc>>,
	pub scopes: Vec<String>,
}

impl std::fmt::Debug for AccessToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AccessToken")
			.field("access", &self.access)
			.field("refresh", &self.refresh)
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("scopes", &self.scopes)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
	pub id: String,
	pub owner: String,
	pub name: String,
	pub full_name: String,
	pub default_branch: Option<String>,
	pub clone_url: Option<String>,
	pub web_url: Option<String>,
	pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
	pub name: String,
	pub commit_sha: String,
}

/// A tag resolved to the commit it points at. Annotated tags are peeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
	pub name: String,
	pub commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
	pub sha: String,
	pub message: String,
	pub author_name: Option<String>,
	pub author_email: Option<String>,
	pub committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
	TarGz,
	Zip,
}

impl ArchiveFormat {
	pub fn extension(&self) -> &'static str {
		match self {
			ArchiveFormat::TarGz => "tar.gz",
			ArchiveFormat::Zip => "zip",
		}
	}
}

/// Webhook to install on a repository.
#[derive(Clone)]
pub struct WebhookConfig {
	pub url: String,
	pub secret: SecretString,
	pub events: Vec<String>,
}

impl std::fmt::Debug for WebhookConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// delivery URLs embed the path secret
		f.debug_struct("WebhookConfig")
			.field("url", &"[REDACTED]")
			.field("secret", &self.secret)
			.field("events", &self.events)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookInfo {
	pub id: String,
	pub active: bool,
}

/// A parsed webhook delivery, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingHook {
	/// Provider-supplied delivery id, used for idempotency lookups.
	pub id: String,
	pub event_type: String,
	pub git_ref: Option<String>,
	pub commit_sha: Option<String>,
	pub tag_name: Option<String>,
	pub payload: String,
}

impl IncomingHook {
	pub fn is_tag_event(&self) -> bool {
		self.tag_name.is_some() && self.commit_sha.is_some()
	}
}

/// Strip `refs/tags/` from a ref, returning the tag name.
pub(crate) fn tag_from_ref(git_ref: &str) -> Option<String> {
	git_ref
		.strip_prefix("refs/tags/")
		.filter(|t| !t.is_empty())
		.map(str::to_string)
}

/// All-zero SHAs mark ref deletions in push payloads.
pub(crate) fn is_null_sha(sha: &str) -> bool {
	!sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

/// Everything needed to build a connector for one provider configuration.
#[derive(Clone)]
pub struct ConnectorSettings {
	pub kind: ScmKind,
	/// API base for self-hosted instances, or the organization URL for Azure DevOps.
	pub base_url: Option<String>,
	pub tenant_id: Option<String>,
	pub client_id: String,
	pub client_secret: SecretString,
	pub redirect_uri: String,
	/// Overrides the OAuth host (tests, sovereign clouds).
	pub auth_base_url: Option<String>,
	pub request_timeout: Duration,
	pub archive_timeout: Duration,
}

impl std::fmt::Debug for ConnectorSettings {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectorSettings")
			.field("kind", &self.kind)
			.field("base_url", &self.base_url)
			.field("tenant_id", &self.tenant_id)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("redirect_uri", &self.redirect_uri)
			.field("auth_base_url", &self.auth_base_url)
			.finish()
	}
}

impl ConnectorSettings {
	pub fn new(kind: ScmKind, client_id: impl Into<String>, client_secret: SecretString) -> Self {
		Self {
			kind,
			base_url: None,
			tenant_id: None,
			client_id: client_id.into(),
			client_secret,
			redirect_uri: String::new(),
			auth_base_url: None,
			request_timeout: Duration::from_secs(30),
			archive_timeout: Duration::from_secs(300),
		}
	}

	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = Some(base_url.into());
		self
	}

	pub fn with_auth_base_url(mut self, auth_base_url: impl Into<String>) -> Self {
		self.auth_base_url = Some(auth_base_url.into());
		self
	}

	pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = redirect_uri.into();
		self
	}

	pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant_id.into());
		self
	}

	pub(crate) fn trimmed_base_url(&self) -> Option<String> {
		self
			.base_url
			.as_deref()
			.map(|u| u.trim_end_matches('/').to_string())
			.filter(|u| !u.is_empty())
	}
}
