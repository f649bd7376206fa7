// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use http::HeaderMap;
use terrace_common_secret::SecretString;
use terrace_server_db::ScmKind;

use crate::error::{Result, ScmError};
use crate::types::{
	AccessToken, ArchiveFormat, ArchiveStream, Branch, Commit, IncomingHook, Page, Pagination, Repository, Tag,
	WebhookConfig, WebhookInfo,
};

/// Maximum number of repositories scanned by the default client-side search.
const SEARCH_SCAN_LIMIT: u32 = 10;

/// Uniform capability surface over one source-control provider.
///
/// Every network call takes the caller's access token explicitly; connectors
/// hold only the OAuth application credentials.
#[async_trait]
pub trait ScmConnector: Send + Sync {
	fn kind(&self) -> ScmKind;

	/// Archive format the provider serves natively.
	fn preferred_archive_format(&self) -> ArchiveFormat {
		ArchiveFormat::TarGz
	}

	fn authorization_url(&self, state: &str, scopes: &[String]) -> Result<String>;

	async fn complete_authorization(&self, code: &str) -> Result<AccessToken>;

	/// Refresh grant. Failures surface as [`ScmError::TokenRefreshFailed`].
	async fn renew_token(&self, refresh_token: &SecretString) -> Result<AccessToken>;

	async fn fetch_repositories(&self, token: &SecretString, pagination: Pagination) -> Result<Page<Repository>>;

	async fn fetch_repository(&self, token: &SecretString, owner: &str, repo: &str) -> Result<Repository>;

	/// Case-insensitive substring search over repository full names.
	///
	/// The default walks [`ScmConnector::fetch_repositories`] for backends
	/// without server-side search.
	async fn search_repositories(
		&self,
		token: &SecretString,
		query: &str,
		pagination: Pagination,
	) -> Result<Page<Repository>> {
		let needle = query.to_lowercase();
		let mut matched = Vec::new();
		let mut cursor = Pagination::new(1, Pagination::MAX_PAGE_SIZE);

		for _ in 0..SEARCH_SCAN_LIMIT {
			let page = self.fetch_repositories(token, cursor).await?;
			matched.extend(
				page
					.items
					.into_iter()
					.filter(|r| r.full_name.to_lowercase().contains(&needle)),
			);
			if !page.more_pages {
				break;
			}
			cursor = cursor.next();
		}

		Ok(Page::from_all(matched, pagination))
	}

	async fn fetch_branches(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Branch>>;

	async fn fetch_tags(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Tag>>;

	async fn fetch_tag_by_name(&self, token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag>;

	async fn fetch_commit(&self, token: &SecretString, owner: &str, repo: &str, sha: &str) -> Result<Commit>;

	async fn download_source_archive(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		git_ref: &str,
		format: ArchiveFormat,
	) -> Result<ArchiveStream>;

	async fn register_webhook(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		config: &WebhookConfig,
	) -> Result<WebhookInfo>;

	async fn remove_webhook(&self, token: &SecretString, owner: &str, repo: &str, webhook_id: &str) -> Result<()>;

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook>;

	fn verify_delivery_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool;
}

/// Header carrying the delivery signature or shared token for each provider.
pub fn signature_header(kind: ScmKind) -> &'static str {
	match kind {
		ScmKind::GitHub => "X-Hub-Signature-256",
		ScmKind::GitLab => "X-Gitlab-Token",
		ScmKind::AzureDevOps => "X-Vss-Signature",
		ScmKind::BitbucketDc => "X-Hub-Signature",
	}
}

/// Read a header as UTF-8, treating absent and non-UTF-8 values alike.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers
		.get(name)
		.and_then(|v| v.to_str().ok())
		.map(str::trim)
		.filter(|v| !v.is_empty())
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T> {
	serde_json::from_slice(payload).map_err(|e| ScmError::InvalidPayload(e.to_string()))
}

pub(crate) fn payload_text(payload: &[u8]) -> Result<String> {
	String::from_utf8(payload.to_vec()).map_err(|_| ScmError::InvalidPayload("payload is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_signature_headers_per_kind() {
		assert_eq!(signature_header(ScmKind::GitHub), "X-Hub-Signature-256");
		assert_eq!(signature_header(ScmKind::GitLab), "X-Gitlab-Token");
		assert_eq!(signature_header(ScmKind::AzureDevOps), "X-Vss-Signature");
		assert_eq!(signature_header(ScmKind::BitbucketDc), "X-Hub-Signature");
	}

	#[test]
	fn test_header_str_ignores_blank() {
		let mut headers = HeaderMap::new();
		headers.insert("x-a", "  ".parse().unwrap());
		headers.insert("x-b", " value ".parse().unwrap());
		assert_eq!(header_str(&headers, "x-a"), None);
		assert_eq!(header_str(&headers, "x-b"), Some("value"));
		assert_eq!(header_str(&headers, "x-c"), None);
	}
}
