// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! GitLab (SaaS and self-managed) connector.
//!
//! Projects are addressed by their URL-encoded `owner/repo` path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use terrace_common_secret::SecretString;
use terrace_server_db::ScmKind;
use tracing::{debug, instrument};
use url::Url;
use urlencoding::encode;

use crate::connector::{header_str, parse_json, payload_text, ScmConnector};
use crate::error::{Result, ScmError};
use crate::http::ApiClient;
use crate::types::{
	is_null_sha, tag_from_ref, AccessToken, ArchiveFormat, ArchiveStream, Branch, Commit, ConnectorSettings,
	IncomingHook, Page, Pagination, Repository, Tag, WebhookConfig, WebhookInfo,
};

const GITLAB_URL: &str = "https://gitlab.com";

pub struct GitLabConnector {
	settings: ConnectorSettings,
	api: ApiClient,
	base: String,
}

impl GitLabConnector {
	pub fn new(settings: ConnectorSettings) -> Result<Self> {
		let api = ApiClient::new(&settings)?;
		let base = settings
			.trimmed_base_url()
			.unwrap_or_else(|| GITLAB_URL.to_string());
		Ok(Self { settings, api, base })
	}

	fn auth_base(&self) -> String {
		self
			.settings
			.auth_base_url
			.as_deref()
			.map(|u| u.trim_end_matches('/').to_string())
			.unwrap_or_else(|| self.base.clone())
	}

	fn project_url(&self, owner: &str, repo: &str) -> String {
		format!("{}/api/v4/projects/{}", self.base, encode(&format!("{owner}/{repo}")))
	}

	fn paged(&self, url: &str, token: &SecretString, pagination: Pagination) -> reqwest::RequestBuilder {
		self.api.get(url, token).query(&[
			("per_page", pagination.page_size),
			("page", pagination.page),
		])
	}
}

/// GitLab advertises the next page number in `X-Next-Page`, empty on the last page.
fn has_next_page(headers: &HeaderMap) -> bool {
	headers
		.get("x-next-page")
		.and_then(|v| v.to_str().ok())
		.map(|v| !v.trim().is_empty())
		.unwrap_or(false)
}

#[derive(Deserialize)]
struct Namespace {
	full_path: String,
}

#[derive(Deserialize)]
struct Project {
	id: u64,
	path: String,
	path_with_namespace: String,
	namespace: Namespace,
	default_branch: Option<String>,
	http_url_to_repo: Option<String>,
	web_url: Option<String>,
	visibility: Option<String>,
}

impl From<Project> for Repository {
	fn from(p: Project) -> Self {
		Repository {
			id: p.id.to_string(),
			owner: p.namespace.full_path,
			name: p.path,
			full_name: p.path_with_namespace,
			default_branch: p.default_branch,
			clone_url: p.http_url_to_repo,
			web_url: p.web_url,
			private: p.visibility.as_deref() != Some("public"),
		}
	}
}

#[derive(Deserialize)]
struct CommitSummary {
	id: String,
}

#[derive(Deserialize)]
struct NamedRef {
	name: String,
	commit: CommitSummary,
}

#[derive(Deserialize)]
struct CommitResponse {
	id: String,
	message: String,
	author_name: Option<String>,
	author_email: Option<String>,
	committed_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct HookResponse {
	id: u64,
}

#[derive(Deserialize)]
struct PushPayload {
	#[serde(rename = "ref")]
	git_ref: Option<String>,
	after: Option<String>,
	checkout_sha: Option<String>,
}

#[async_trait]
impl ScmConnector for GitLabConnector {
	fn kind(&self) -> ScmKind {
		ScmKind::GitLab
	}

	fn authorization_url(&self, state: &str, scopes: &[String]) -> Result<String> {
		let mut url = Url::parse(&format!("{}/oauth/authorize", self.auth_base()))
			.map_err(|e| ScmError::Config(format!("invalid GitLab URL: {e}")))?;

		url
			.query_pairs_mut()
			.append_pair("client_id", &self.settings.client_id)
			.append_pair("redirect_uri", &self.settings.redirect_uri)
			.append_pair("response_type", "code")
			.append_pair("scope", &scopes.join(" "))
			.append_pair("state", state);

		Ok(url.to_string())
	}

	#[instrument(skip(self, code))]
	async fn complete_authorization(&self, code: &str) -> Result<AccessToken> {
		self
			.api
			.exchange_token(
				"complete_authorization",
				&format!("{}/oauth/token", self.auth_base()),
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("code", code),
					("grant_type", "authorization_code"),
					("redirect_uri", self.settings.redirect_uri.as_str()),
				],
				false,
			)
			.await
	}

	#[instrument(skip(self, refresh_token))]
	async fn renew_token(&self, refresh_token: &SecretString) -> Result<AccessToken> {
		self
			.api
			.exchange_token(
				"renew_token",
				&format!("{}/oauth/token", self.auth_base()),
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("refresh_token", refresh_token.expose().as_str()),
					("grant_type", "refresh_token"),
					("redirect_uri", self.settings.redirect_uri.as_str()),
				],
				true,
			)
			.await
	}

	#[instrument(skip(self, token))]
	async fn fetch_repositories(&self, token: &SecretString, pagination: Pagination) -> Result<Page<Repository>> {
		let url = format!("{}/api/v4/projects", self.base);
		let request = self
			.paged(&url, token, pagination)
			.query(&[("membership", "true"), ("order_by", "path"), ("sort", "asc")]);
		let (projects, headers) = self
			.api
			.json::<Vec<Project>>("fetch_repositories", request)
			.await?;
		Ok(Page::new(
			projects.into_iter().map(Repository::from).collect(),
			has_next_page(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_repository(&self, token: &SecretString, owner: &str, repo: &str) -> Result<Repository> {
		let (project, _) = self
			.api
			.json::<Project>("fetch_repository", self.api.get(&self.project_url(owner, repo), token))
			.await?;
		Ok(project.into())
	}

	#[instrument(skip(self, token))]
	async fn search_repositories(
		&self,
		token: &SecretString,
		query: &str,
		pagination: Pagination,
	) -> Result<Page<Repository>> {
		let url = format!("{}/api/v4/projects", self.base);
		let request = self
			.paged(&url, token, pagination)
			.query(&[("membership", "true"), ("search", query)]);
		let (projects, headers) = self
			.api
			.json::<Vec<Project>>("search_repositories", request)
			.await?;
		Ok(Page::new(
			projects.into_iter().map(Repository::from).collect(),
			has_next_page(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_branches(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Branch>> {
		let url = format!("{}/repository/branches", self.project_url(owner, repo));
		let (branches, headers) = self
			.api
			.json::<Vec<NamedRef>>("fetch_branches", self.paged(&url, token, pagination))
			.await?;
		Ok(Page::new(
			branches
				.into_iter()
				.map(|b| Branch {
					name: b.name,
					commit_sha: b.commit.id,
				})
				.collect(),
			has_next_page(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tags(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Tag>> {
		let url = format!("{}/repository/tags", self.project_url(owner, repo));
		let (tags, headers) = self
			.api
			.json::<Vec<NamedRef>>("fetch_tags", self.paged(&url, token, pagination))
			.await?;
		Ok(Page::new(
			tags
				.into_iter()
				.map(|t| Tag {
					name: t.name,
					commit_sha: t.commit.id,
				})
				.collect(),
			has_next_page(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tag_by_name(&self, token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag> {
		let url = format!("{}/repository/tags/{}", self.project_url(owner, repo), encode(tag));
		let (found, _) = self
			.api
			.json::<NamedRef>("fetch_tag_by_name", self.api.get(&url, token))
			.await?;
		Ok(Tag {
			name: found.name,
			commit_sha: found.commit.id,
		})
	}

	#[instrument(skip(self, token))]
	async fn fetch_commit(&self, token: &SecretString, owner: &str, repo: &str, sha: &str) -> Result<Commit> {
		let url = format!("{}/repository/commits/{}", self.project_url(owner, repo), encode(sha));
		let (commit, _) = self
			.api
			.json::<CommitResponse>("fetch_commit", self.api.get(&url, token))
			.await?;
		Ok(Commit {
			sha: commit.id,
			message: commit.message,
			author_name: commit.author_name,
			author_email: commit.author_email,
			committed_at: commit.committed_date,
		})
	}

	#[instrument(skip(self, token))]
	async fn download_source_archive(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		git_ref: &str,
		format: ArchiveFormat,
	) -> Result<ArchiveStream> {
		let url = format!(
			"{}/repository/archive.{}",
			self.project_url(owner, repo),
			format.extension()
		);
		let request = self.api.archive_get(&url, token).query(&[("sha", git_ref)]);
		self.api.stream("download_source_archive", request).await
	}

	#[instrument(skip(self, token, config))]
	async fn register_webhook(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		config: &WebhookConfig,
	) -> Result<WebhookInfo> {
		let url = format!("{}/hooks", self.project_url(owner, repo));
		let body = serde_json::json!({
			"url": config.url,
			"token": config.secret.expose(),
			"push_events": false,
			"tag_push_events": true,
			"enable_ssl_verification": true,
		});
		let (hook, _) = self
			.api
			.json::<HookResponse>("register_webhook", self.api.post(&url, token).json(&body))
			.await
			.map_err(|e| ScmError::WebhookSetupFailed(e.to_string()))?;

		debug!(hook_id = hook.id, "registered GitLab project hook");
		Ok(WebhookInfo {
			id: hook.id.to_string(),
			active: true,
		})
	}

	#[instrument(skip(self, token))]
	async fn remove_webhook(&self, token: &SecretString, owner: &str, repo: &str, webhook_id: &str) -> Result<()> {
		let url = format!("{}/hooks/{}", self.project_url(owner, repo), encode(webhook_id));
		match self.api.send("remove_webhook", self.api.delete(&url, token)).await {
			Ok(_) => Ok(()),
			Err(ScmError::NotFound(_)) => Err(ScmError::WebhookNotFound(webhook_id.to_string())),
			Err(e) => Err(e),
		}
	}

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook> {
		let event_type = header_str(headers, "X-Gitlab-Event")
			.ok_or_else(|| ScmError::InvalidPayload("missing X-Gitlab-Event header".into()))?;
		// older GitLab releases omit the UUID; fall back to a content-derived id
		let id = match header_str(headers, "X-Gitlab-Event-UUID") {
			Some(id) => id.to_string(),
			None => format!("sha256:{}", hex::encode(Sha256::digest(payload))),
		};

		let mut hook = IncomingHook {
			id,
			event_type: event_type.to_string(),
			git_ref: None,
			commit_sha: None,
			tag_name: None,
			payload: payload_text(payload)?,
		};

		if event_type == "Tag Push Hook" || event_type == "Push Hook" {
			let push: PushPayload = parse_json(payload)?;
			hook.tag_name = push.git_ref.as_deref().and_then(tag_from_ref);
			hook.commit_sha = push
				.checkout_sha
				.or(push.after)
				.filter(|sha| !is_null_sha(sha));
			hook.git_ref = push.git_ref;
		} else {
			parse_json::<serde_json::Value>(payload)?;
		}

		Ok(hook)
	}

	fn verify_delivery_signature(&self, _payload: &[u8], signature: &str, secret: &str) -> bool {
		terrace_common_webhook::verify_token(secret, signature.trim())
	}
}
