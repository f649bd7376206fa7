// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bitbucket Data Center connector. The repository owner is the project key.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use http::HeaderMap;
use serde::Deserialize;
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

pub struct BitbucketDcConnector {
	settings: ConnectorSettings,
	api: ApiClient,
	base: String,
}

impl BitbucketDcConnector {
	pub fn new(settings: ConnectorSettings) -> Result<Self> {
		let base = settings
			.trimmed_base_url()
			.ok_or_else(|| ScmError::Config("Bitbucket Data Center requires base_url".into()))?;
		let api = ApiClient::new(&settings)?;
		Ok(Self { settings, api, base })
	}

	fn oauth_base(&self) -> String {
		let host = self
			.settings
			.auth_base_url
			.as_deref()
			.map(|u| u.trim_end_matches('/'))
			.unwrap_or(&self.base);
		format!("{host}/rest/oauth2/latest")
	}

	fn repo_url(&self, project: &str, repo: &str) -> String {
		format!(
			"{}/rest/api/1.0/projects/{}/repos/{}",
			self.base,
			encode(project),
			encode(repo)
		)
	}

	fn paged(&self, url: &str, token: &SecretString, pagination: Pagination) -> reqwest::RequestBuilder {
		self.api.get(url, token).query(&[
			("start", pagination.offset()),
			("limit", pagination.page_size),
		])
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedResponse<T> {
	values: Vec<T>,
	#[serde(default = "default_true")]
	is_last_page: bool,
}

fn default_true() -> bool {
	true
}

#[derive(Deserialize)]
struct ProjectRef {
	key: String,
}

#[derive(Deserialize)]
struct Link {
	href: String,
	#[serde(default)]
	name: Option<String>,
}

#[derive(Deserialize, Default)]
struct RepoLinks {
	#[serde(default)]
	clone: Vec<Link>,
	#[serde(default, rename = "self")]
	self_links: Vec<Link>,
}

#[derive(Deserialize)]
struct BitbucketRepository {
	id: u64,
	slug: String,
	project: ProjectRef,
	#[serde(default)]
	public: bool,
	#[serde(default)]
	links: RepoLinks,
}

impl From<BitbucketRepository> for Repository {
	fn from(r: BitbucketRepository) -> Self {
		let clone_url = r
			.links
			.clone
			.iter()
			.find(|l| l.name.as_deref() == Some("http"))
			.map(|l| l.href.clone());
		Repository {
			id: r.id.to_string(),
			full_name: format!("{}/{}", r.project.key, r.slug),
			owner: r.project.key,
			name: r.slug,
			default_branch: None,
			clone_url,
			web_url: r.links.self_links.into_iter().next().map(|l| l.href),
			private: !r.public,
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefEntry {
	display_id: String,
	latest_commit: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitPerson {
	name: Option<String>,
	email_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
	id: String,
	#[serde(default)]
	message: String,
	author: Option<CommitPerson>,
	author_timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct WebhookResponse {
	id: u64,
	#[serde(default = "default_true")]
	active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedRef {
	id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefChange {
	#[serde(rename = "ref")]
	changed_ref: Option<ChangedRef>,
	ref_id: Option<String>,
	to_hash: Option<String>,
	#[serde(rename = "type")]
	change_type: Option<String>,
}

impl RefChange {
	fn ref_name(&self) -> Option<&str> {
		self
			.changed_ref
			.as_ref()
			.map(|r| r.id.as_str())
			.or(self.ref_id.as_deref())
	}
}

#[derive(Deserialize)]
struct RefsChangedPayload {
	#[serde(default)]
	changes: Vec<RefChange>,
}

#[async_trait]
impl ScmConnector for BitbucketDcConnector {
	fn kind(&self) -> ScmKind {
		ScmKind::BitbucketDc
	}

	fn authorization_url(&self, state: &str, scopes: &[String]) -> Result<String> {
		let mut url = Url::parse(&format!("{}/authorize", self.oauth_base()))
			.map_err(|e| ScmError::Config(format!("invalid Bitbucket URL: {e}")))?;

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
				&format!("{}/token", self.oauth_base()),
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
				&format!("{}/token", self.oauth_base()),
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("refresh_token", refresh_token.expose().as_str()),
					("grant_type", "refresh_token"),
				],
				true,
			)
			.await
	}

	#[instrument(skip(self, token))]
	async fn fetch_repositories(&self, token: &SecretString, pagination: Pagination) -> Result<Page<Repository>> {
		let url = format!("{}/rest/api/1.0/repos", self.base);
		let (page, _) = self
			.api
			.json::<PagedResponse<BitbucketRepository>>("fetch_repositories", self.paged(&url, token, pagination))
			.await?;
		Ok(Page::new(
			page.values.into_iter().map(Repository::from).collect(),
			!page.is_last_page,
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_repository(&self, token: &SecretString, owner: &str, repo: &str) -> Result<Repository> {
		let (found, _) = self
			.api
			.json::<BitbucketRepository>("fetch_repository", self.api.get(&self.repo_url(owner, repo), token))
			.await?;
		let mut repository = Repository::from(found);

		let url = format!("{}/default-branch", self.repo_url(owner, repo));
		match self
			.api
			.json::<RefEntry>("fetch_repository", self.api.get(&url, token))
			.await
		{
			Ok((branch, _)) => repository.default_branch = Some(branch.display_id),
			// empty repositories have no default branch
			Err(ScmError::NotFound(_)) => {}
			Err(e) => return Err(e),
		}
		Ok(repository)
	}

	#[instrument(skip(self, token))]
	async fn search_repositories(
		&self,
		token: &SecretString,
		query: &str,
		pagination: Pagination,
	) -> Result<Page<Repository>> {
		let url = format!("{}/rest/api/1.0/repos", self.base);
		let request = self.paged(&url, token, pagination).query(&[("name", query)]);
		let (page, _) = self
			.api
			.json::<PagedResponse<BitbucketRepository>>("search_repositories", request)
			.await?;
		Ok(Page::new(
			page.values.into_iter().map(Repository::from).collect(),
			!page.is_last_page,
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
		let url = format!("{}/branches", self.repo_url(owner, repo));
		let (page, _) = self
			.api
			.json::<PagedResponse<RefEntry>>("fetch_branches", self.paged(&url, token, pagination))
			.await?;
		Ok(Page::new(
			page
				.values
				.into_iter()
				.map(|b| Branch {
					name: b.display_id,
					commit_sha: b.latest_commit,
				})
				.collect(),
			!page.is_last_page,
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
		let url = format!("{}/tags", self.repo_url(owner, repo));
		let (page, _) = self
			.api
			.json::<PagedResponse<RefEntry>>("fetch_tags", self.paged(&url, token, pagination))
			.await?;
		Ok(Page::new(
			page
				.values
				.into_iter()
				.map(|t| Tag {
					name: t.display_id,
					commit_sha: t.latest_commit,
				})
				.collect(),
			!page.is_last_page,
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tag_by_name(&self, token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag> {
		let url = format!("{}/tags/{}", self.repo_url(owner, repo), encode(tag));
		let (found, _) = self
			.api
			.json::<RefEntry>("fetch_tag_by_name", self.api.get(&url, token))
			.await?;
		Ok(Tag {
			name: found.display_id,
			commit_sha: found.latest_commit,
		})
	}

	#[instrument(skip(self, token))]
	async fn fetch_commit(&self, token: &SecretString, owner: &str, repo: &str, sha: &str) -> Result<Commit> {
		let url = format!("{}/commits/{}", self.repo_url(owner, repo), encode(sha));
		let (commit, _) = self
			.api
			.json::<CommitResponse>("fetch_commit", self.api.get(&url, token))
			.await?;
		let committed_at: Option<DateTime<Utc>> = commit
			.author_timestamp
			.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
		Ok(Commit {
			sha: commit.id,
			message: commit.message,
			author_name: commit.author.as_ref().and_then(|a| a.name.clone()),
			author_email: commit.author.and_then(|a| a.email_address),
			committed_at,
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
		let url = format!("{}/archive", self.repo_url(owner, repo));
		let request = self
			.api
			.archive_get(&url, token)
			.query(&[("at", git_ref), ("format", format.extension())]);
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
		let url = format!("{}/webhooks", self.repo_url(owner, repo));
		let body = serde_json::json!({
			"name": "terrace",
			"events": ["repo:refs_changed"],
			"url": config.url,
			"active": true,
			"configuration": {
				"secret": config.secret.expose(),
			}
		});

		// personal-access-token installs without repo admin rights get 401/403 here
		let (hook, _) = self
			.api
			.json::<WebhookResponse>("register_webhook", self.api.post(&url, token).json(&body))
			.await
			.map_err(|e| ScmError::WebhookSetupFailed(e.to_string()))?;

		debug!(hook_id = hook.id, "registered Bitbucket webhook");
		Ok(WebhookInfo {
			id: hook.id.to_string(),
			active: hook.active,
		})
	}

	#[instrument(skip(self, token))]
	async fn remove_webhook(&self, token: &SecretString, owner: &str, repo: &str, webhook_id: &str) -> Result<()> {
		let url = format!("{}/webhooks/{}", self.repo_url(owner, repo), encode(webhook_id));
		match self.api.send("remove_webhook", self.api.delete(&url, token)).await {
			Ok(_) => Ok(()),
			Err(ScmError::NotFound(_)) => Err(ScmError::WebhookNotFound(webhook_id.to_string())),
			Err(e) => Err(e),
		}
	}

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook> {
		let id = header_str(headers, "X-Request-Id")
			.ok_or_else(|| ScmError::InvalidPayload("missing X-Request-Id header".into()))?;
		let event_type = header_str(headers, "X-Event-Key")
			.ok_or_else(|| ScmError::InvalidPayload("missing X-Event-Key header".into()))?;

		let mut hook = IncomingHook {
			id: id.to_string(),
			event_type: event_type.to_string(),
			git_ref: None,
			commit_sha: None,
			tag_name: None,
			payload: payload_text(payload)?,
		};

		if event_type == "repo:refs_changed" {
			let event: RefsChangedPayload = parse_json(payload)?;
			let change = event
				.changes
				.iter()
				.filter(|c| c.change_type.as_deref() != Some("DELETE"))
				.find(|c| c.ref_name().is_some_and(|r| r.starts_with("refs/tags/")))
				.or_else(|| event.changes.first());

			if let Some(change) = change {
				hook.git_ref = change.ref_name().map(str::to_string);
				hook.tag_name = change.ref_name().and_then(tag_from_ref);
				// may name an annotated tag object; the publisher peels it
				hook.commit_sha = change
					.to_hash
					.clone()
					.filter(|sha| !is_null_sha(sha));
			}
		} else if !payload.is_empty() {
			parse_json::<serde_json::Value>(payload)?;
		}

		Ok(hook)
	}

	fn verify_delivery_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
		let signature = signature.trim();
		signature.starts_with(terrace_common_webhook::SHA256_PREFIX)
			&& terrace_common_webhook::verify_prefixed(secret.as_bytes(), payload, signature)
	}
}
