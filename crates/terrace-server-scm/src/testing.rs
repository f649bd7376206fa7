// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory connector for exercising callers without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use http::HeaderMap;
use terrace_common_secret::SecretString;
use terrace_server_db::ScmKind;

use crate::connector::{header_str, parse_json, payload_text, ScmConnector};
use crate::error::{Result, ScmError};
use crate::types::{
	tag_from_ref, AccessToken, ArchiveFormat, ArchiveStream, Branch, Commit, IncomingHook, Page, Pagination,
	Repository, Tag, WebhookConfig, WebhookInfo,
};

/// Header carrying the delivery id in mock deliveries.
pub const MOCK_DELIVERY_HEADER: &str = "X-Mock-Delivery";

/// Deliveries are JSON `{"ref": ..., "after": ...}` signed like GitHub.
pub struct MockConnector {
	pub kind: ScmKind,
	pub archive_format: ArchiveFormat,
	pub tags: Mutex<HashMap<String, String>>,
	pub archive: Mutex<Option<Vec<u8>>>,
	pub archive_requests: Mutex<Vec<String>>,
	pub registered: Mutex<Vec<String>>,
	pub removed: Mutex<Vec<String>>,
	pub renewals: Mutex<u32>,
	pub fail_renewal: Mutex<bool>,
}

impl MockConnector {
	pub fn new(kind: ScmKind) -> Self {
		Self {
			kind,
			archive_format: ArchiveFormat::TarGz,
			tags: Mutex::new(HashMap::new()),
			archive: Mutex::new(None),
			archive_requests: Mutex::new(Vec::new()),
			registered: Mutex::new(Vec::new()),
			removed: Mutex::new(Vec::new()),
			renewals: Mutex::new(0),
			fail_renewal: Mutex::new(false),
		}
	}

	pub fn with_archive(self, bytes: Vec<u8>) -> Self {
		*self.archive.lock().unwrap() = Some(bytes);
		self
	}

	pub fn with_tag(self, name: &str, commit: &str) -> Self {
		self.tags.lock().unwrap().insert(name.to_string(), commit.to_string());
		self
	}

	pub fn set_tag(&self, name: &str, commit: &str) {
		self.tags.lock().unwrap().insert(name.to_string(), commit.to_string());
	}
}

fn token(access: &str, refresh: Option<&str>) -> AccessToken {
	AccessToken {
		access: SecretString::new(access.to_string()),
		refresh: refresh.map(|r| SecretString::new(r.to_string())),
		token_type: "bearer".to_string(),
		expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
		scopes: vec!["repo".to_string()],
	}
}

#[async_trait]
impl ScmConnector for MockConnector {
	fn kind(&self) -> ScmKind {
		self.kind
	}

	fn preferred_archive_format(&self) -> ArchiveFormat {
		self.archive_format
	}

	fn authorization_url(&self, state: &str, _scopes: &[String]) -> Result<String> {
		Ok(format!("https://scm.invalid/authorize?state={state}"))
	}

	async fn complete_authorization(&self, code: &str) -> Result<AccessToken> {
		Ok(token(&format!("access-{code}"), Some("refresh")))
	}

	async fn renew_token(&self, _refresh_token: &SecretString) -> Result<AccessToken> {
		if *self.fail_renewal.lock().unwrap() {
			return Err(ScmError::TokenRefreshFailed("invalid_grant".into()));
		}
		let mut renewals = self.renewals.lock().unwrap();
		*renewals += 1;
		Ok(token(&format!("renewed-{}", *renewals), Some("refresh-next")))
	}

	async fn fetch_repositories(&self, _token: &SecretString, pagination: Pagination) -> Result<Page<Repository>> {
		Ok(Page::from_all(Vec::new(), pagination))
	}

	async fn fetch_repository(&self, _token: &SecretString, owner: &str, repo: &str) -> Result<Repository> {
		Ok(Repository {
			id: format!("{owner}/{repo}"),
			owner: owner.to_string(),
			name: repo.to_string(),
			full_name: format!("{owner}/{repo}"),
			default_branch: Some("main".to_string()),
			clone_url: None,
			web_url: None,
			private: true,
		})
	}

	async fn fetch_branches(
		&self,
		_token: &SecretString,
		_owner: &str,
		_repo: &str,
		pagination: Pagination,
	) -> Result<Page<Branch>> {
		Ok(Page::from_all(Vec::new(), pagination))
	}

	async fn fetch_tags(
		&self,
		_token: &SecretString,
		_owner: &str,
		_repo: &str,
		pagination: Pagination,
	) -> Result<Page<Tag>> {
		let mut tags: Vec<Tag> = self
			.tags
			.lock()
			.unwrap()
			.iter()
			.map(|(name, sha)| Tag {
				name: name.clone(),
				commit_sha: sha.clone(),
			})
			.collect();
		tags.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(Page::from_all(tags, pagination))
	}

	async fn fetch_tag_by_name(&self, _token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag> {
		self
			.tags
			.lock()
			.unwrap()
			.get(tag)
			.map(|sha| Tag {
				name: tag.to_string(),
				commit_sha: sha.clone(),
			})
			.ok_or_else(|| ScmError::NotFound(format!("tag {tag} in {owner}/{repo}")))
	}

	async fn fetch_commit(&self, _token: &SecretString, _owner: &str, _repo: &str, sha: &str) -> Result<Commit> {
		Ok(Commit {
			sha: sha.to_string(),
			message: "mock commit".to_string(),
			author_name: None,
			author_email: None,
			committed_at: None,
		})
	}

	async fn download_source_archive(
		&self,
		_token: &SecretString,
		owner: &str,
		repo: &str,
		git_ref: &str,
		_format: ArchiveFormat,
	) -> Result<ArchiveStream> {
		self.archive_requests.lock().unwrap().push(git_ref.to_string());
		let bytes = self
			.archive
			.lock()
			.unwrap()
			.clone()
			.ok_or_else(|| ScmError::NotFound(format!("archive for {owner}/{repo}@{git_ref}")))?;
		let chunks: Vec<std::io::Result<Bytes>> = bytes
			.chunks(1024)
			.map(|c| Ok(Bytes::copy_from_slice(c)))
			.collect();
		Ok(futures::stream::iter(chunks).boxed())
	}

	async fn register_webhook(
		&self,
		_token: &SecretString,
		owner: &str,
		repo: &str,
		_config: &WebhookConfig,
	) -> Result<WebhookInfo> {
		let mut registered = self.registered.lock().unwrap();
		registered.push(format!("{owner}/{repo}"));
		Ok(WebhookInfo {
			id: format!("hook-{}", registered.len()),
			active: true,
		})
	}

	async fn remove_webhook(&self, _token: &SecretString, _owner: &str, _repo: &str, webhook_id: &str) -> Result<()> {
		self.removed.lock().unwrap().push(webhook_id.to_string());
		Ok(())
	}

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook> {
		#[derive(serde::Deserialize)]
		struct Push {
			#[serde(rename = "ref")]
			git_ref: Option<String>,
			after: Option<String>,
		}

		let id = header_str(headers, MOCK_DELIVERY_HEADER)
			.ok_or_else(|| ScmError::InvalidPayload("missing delivery id".into()))?;
		let push: Push = parse_json(payload)?;
		Ok(IncomingHook {
			id: id.to_string(),
			event_type: "push".to_string(),
			tag_name: push.git_ref.as_deref().and_then(tag_from_ref),
			git_ref: push.git_ref,
			commit_sha: push.after,
			payload: payload_text(payload)?,
		})
	}

	fn verify_delivery_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
		terrace_common_webhook::verify_prefixed(secret.as_bytes(), payload, signature)
	}
}
