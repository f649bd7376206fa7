// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Azure DevOps Services connector.
//!
//! The configured base URL is the organization URL
//! (`https://dev.azure.com/{org}`); the repository owner is the project name.
//! OAuth goes through Microsoft Entra ID v2 with the Azure DevOps resource
//! scope. Source archives are only available as zip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

const ENTRA_LOGIN_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_TENANT: &str = "organizations";
const AZURE_DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default offline_access";
const API_VERSION: &str = "7.1";

pub struct AzureDevOpsConnector {
	settings: ConnectorSettings,
	api: ApiClient,
	org_url: String,
	login_base: String,
}

impl AzureDevOpsConnector {
	pub fn new(settings: ConnectorSettings) -> Result<Self> {
		let org_url = settings
			.trimmed_base_url()
			.ok_or_else(|| ScmError::Config("Azure DevOps requires the organization URL as base_url".into()))?;
		let api = ApiClient::new(&settings)?;
		let login_base = settings
			.auth_base_url
			.as_deref()
			.unwrap_or(ENTRA_LOGIN_URL)
			.trim_end_matches('/')
			.to_string();

		Ok(Self {
			settings,
			api,
			org_url,
			login_base,
		})
	}

	fn tenant(&self) -> &str {
		self
			.settings
			.tenant_id
			.as_deref()
			.filter(|t| !t.is_empty())
			.unwrap_or(DEFAULT_TENANT)
	}

	fn oauth_url(&self, endpoint: &str) -> String {
		format!("{}/{}/oauth2/v2.0/{endpoint}", self.login_base, encode(self.tenant()))
	}

	fn repo_url(&self, project: &str, repo: &str) -> String {
		format!(
			"{}/{}/_apis/git/repositories/{}",
			self.org_url,
			encode(project),
			encode(repo)
		)
	}

	fn get(&self, url: &str, token: &SecretString) -> reqwest::RequestBuilder {
		self.api.get(url, token).query(&[("api-version", API_VERSION)])
	}

	async fn refs(&self, token: &SecretString, project: &str, repo: &str, filter: &str) -> Result<Vec<GitRef>> {
		let url = format!("{}/refs", self.repo_url(project, repo));
		let request = self
			.get(&url, token)
			.query(&[("filter", filter), ("peelTags", "true")]);
		let (refs, _) = self.api.json::<ValueList<GitRef>>("fetch_refs", request).await?;
		Ok(refs.value)
	}

	async fn raw_repository(&self, token: &SecretString, project: &str, repo: &str) -> Result<AzureRepository> {
		let (repo, _) = self
			.api
			.json::<AzureRepository>("fetch_repository", self.get(&self.repo_url(project, repo), token))
			.await?;
		Ok(repo)
	}
}

#[derive(Deserialize)]
struct ValueList<T> {
	value: Vec<T>,
}

#[derive(Deserialize)]
struct AzureProject {
	id: String,
	name: String,
	#[serde(default)]
	visibility: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureRepository {
	id: String,
	name: String,
	project: AzureProject,
	default_branch: Option<String>,
	remote_url: Option<String>,
	web_url: Option<String>,
}

impl From<AzureRepository> for Repository {
	fn from(r: AzureRepository) -> Self {
		Repository {
			id: r.id,
			full_name: format!("{}/{}", r.project.name, r.name),
			owner: r.project.name,
			name: r.name,
			default_branch: r
				.default_branch
				.map(|b| b.trim_start_matches("refs/heads/").to_string()),
			clone_url: r.remote_url,
			web_url: r.web_url,
			private: r.project.visibility.as_deref() != Some("public"),
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitRef {
	name: String,
	object_id: String,
	peeled_object_id: Option<String>,
}

impl GitRef {
	fn commit(&self) -> String {
		self
			.peeled_object_id
			.clone()
			.unwrap_or_else(|| self.object_id.clone())
	}
}

#[derive(Deserialize)]
struct CommitAuthor {
	name: Option<String>,
	email: Option<String>,
	date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
	commit_id: String,
	#[serde(default)]
	comment: String,
	author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct Subscription {
	id: String,
	#[serde(default)]
	status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefUpdate {
	name: String,
	new_object_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushResource {
	#[serde(default)]
	ref_updates: Vec<RefUpdate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceHookEvent {
	id: Option<String>,
	event_type: String,
	resource: Option<serde_json::Value>,
}

#[async_trait]
impl ScmConnector for AzureDevOpsConnector {
	fn kind(&self) -> ScmKind {
		ScmKind::AzureDevOps
	}

	fn preferred_archive_format(&self) -> ArchiveFormat {
		ArchiveFormat::Zip
	}

	/// Entra ID only issues Azure DevOps tokens for the resource `.default`
	/// scope, so caller scopes are ignored.
	fn authorization_url(&self, state: &str, _scopes: &[String]) -> Result<String> {
		let mut url = Url::parse(&self.oauth_url("authorize"))
			.map_err(|e| ScmError::Config(format!("invalid Entra ID URL: {e}")))?;

		url
			.query_pairs_mut()
			.append_pair("client_id", &self.settings.client_id)
			.append_pair("response_type", "code")
			.append_pair("redirect_uri", &self.settings.redirect_uri)
			.append_pair("response_mode", "query")
			.append_pair("scope", AZURE_DEVOPS_SCOPE)
			.append_pair("state", state);

		Ok(url.to_string())
	}

	#[instrument(skip(self, code))]
	async fn complete_authorization(&self, code: &str) -> Result<AccessToken> {
		self
			.api
			.exchange_token(
				"complete_authorization",
				&self.oauth_url("token"),
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("code", code),
					("grant_type", "authorization_code"),
					("redirect_uri", self.settings.redirect_uri.as_str()),
					("scope", AZURE_DEVOPS_SCOPE),
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
				&self.oauth_url("token"),
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("refresh_token", refresh_token.expose().as_str()),
					("grant_type", "refresh_token"),
					("scope", AZURE_DEVOPS_SCOPE),
				],
				true,
			)
			.await
	}

	/// The repositories endpoint is unpaginated; pages are cut client-side.
	#[instrument(skip(self, token))]
	async fn fetch_repositories(&self, token: &SecretString, pagination: Pagination) -> Result<Page<Repository>> {
		let url = format!("{}/_apis/git/repositories", self.org_url);
		let (repos, _) = self
			.api
			.json::<ValueList<AzureRepository>>("fetch_repositories", self.get(&url, token))
			.await?;
		let mut all: Vec<Repository> = repos.value.into_iter().map(Repository::from).collect();
		all.sort_by(|a, b| a.full_name.cmp(&b.full_name));
		Ok(Page::from_all(all, pagination))
	}

	#[instrument(skip(self, token))]
	async fn fetch_repository(&self, token: &SecretString, owner: &str, repo: &str) -> Result<Repository> {
		Ok(self.raw_repository(token, owner, repo).await?.into())
	}

	#[instrument(skip(self, token))]
	async fn fetch_branches(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Branch>> {
		let branches = self
			.refs(token, owner, repo, "heads/")
			.await?
			.into_iter()
			.map(|r| Branch {
				name: r.name.trim_start_matches("refs/heads/").to_string(),
				commit_sha: r.object_id,
			})
			.collect();
		Ok(Page::from_all(branches, pagination))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tags(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		pagination: Pagination,
	) -> Result<Page<Tag>> {
		let tags = self
			.refs(token, owner, repo, "tags/")
			.await?
			.into_iter()
			.filter_map(|r| {
				let commit_sha = r.commit();
				tag_from_ref(&r.name).map(|name| Tag { name, commit_sha })
			})
			.collect();
		Ok(Page::from_all(tags, pagination))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tag_by_name(&self, token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag> {
		let wanted = format!("refs/tags/{tag}");
		// the refs filter is a prefix match, so v1.0 also returns v1.0.1
		self
			.refs(token, owner, repo, &format!("tags/{tag}"))
			.await?
			.into_iter()
			.find(|r| r.name == wanted)
			.map(|r| Tag {
				name: tag.to_string(),
				commit_sha: r.commit(),
			})
			.ok_or_else(|| ScmError::NotFound(format!("tag {tag} in {owner}/{repo}")))
	}

	#[instrument(skip(self, token))]
	async fn fetch_commit(&self, token: &SecretString, owner: &str, repo: &str, sha: &str) -> Result<Commit> {
		let url = format!("{}/commits/{}", self.repo_url(owner, repo), encode(sha));
		let (commit, _) = self
			.api
			.json::<CommitResponse>("fetch_commit", self.get(&url, token))
			.await?;
		let author = commit.author;
		Ok(Commit {
			sha: commit.commit_id,
			message: commit.comment,
			author_name: author.as_ref().and_then(|a| a.name.clone()),
			author_email: author.as_ref().and_then(|a| a.email.clone()),
			committed_at: author.and_then(|a| a.date),
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
		if format != ArchiveFormat::Zip {
			return Err(ScmError::Unsupported {
				kind: "azure_devops",
				operation: "tar.gz source archives",
			});
		}

		let url = format!("{}/items", self.repo_url(owner, repo));
		let request = self.api.archive_get(&url, token).query(&[
			("path", "/"),
			("versionDescriptor.version", git_ref),
			("versionDescriptor.versionType", "commit"),
			("$format", "zip"),
			("download", "true"),
			("api-version", API_VERSION),
		]);
		self.api.stream("download_source_archive", request).await
	}

	/// Service hooks cannot sign payloads; the shared secret is delivered as a
	/// static `X-Vss-Signature` header instead.
	#[instrument(skip(self, token, config))]
	async fn register_webhook(
		&self,
		token: &SecretString,
		owner: &str,
		repo: &str,
		config: &WebhookConfig,
	) -> Result<WebhookInfo> {
		let repository = self
			.raw_repository(token, owner, repo)
			.await
			.map_err(|e| ScmError::WebhookSetupFailed(e.to_string()))?;

		let url = format!("{}/_apis/hooks/subscriptions", self.org_url);
		let body = serde_json::json!({
			"publisherId": "tfs",
			"eventType": "git.push",
			"resourceVersion": "1.0",
			"consumerId": "webHooks",
			"consumerActionId": "httpRequest",
			"publisherInputs": {
				"projectId": repository.project.id,
				"repository": repository.id,
			},
			"consumerInputs": {
				"url": config.url,
				"httpHeaders": format!("X-Vss-Signature:{}", config.secret.expose()),
			}
		});
		let request = self
			.api
			.post(&url, token)
			.query(&[("api-version", API_VERSION)])
			.json(&body);

		let (subscription, _) = self
			.api
			.json::<Subscription>("register_webhook", request)
			.await
			.map_err(|e| ScmError::WebhookSetupFailed(e.to_string()))?;

		debug!(subscription_id = %subscription.id, "registered Azure DevOps service hook");
		Ok(WebhookInfo {
			active: subscription.status.as_deref().map_or(true, |s| s == "enabled"),
			id: subscription.id,
		})
	}

	#[instrument(skip(self, token))]
	async fn remove_webhook(&self, token: &SecretString, _owner: &str, _repo: &str, webhook_id: &str) -> Result<()> {
		let url = format!("{}/_apis/hooks/subscriptions/{}", self.org_url, encode(webhook_id));
		let request = self
			.api
			.delete(&url, token)
			.query(&[("api-version", API_VERSION)]);
		match self.api.send("remove_webhook", request).await {
			Ok(_) => Ok(()),
			Err(ScmError::NotFound(_)) => Err(ScmError::WebhookNotFound(webhook_id.to_string())),
			Err(e) => Err(e),
		}
	}

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook> {
		let event: ServiceHookEvent = parse_json(payload)?;
		let id = event
			.id
			.clone()
			.or_else(|| header_str(headers, "X-Vss-ActivityId").map(str::to_string))
			.ok_or_else(|| ScmError::InvalidPayload("service hook event has no id".into()))?;

		let mut hook = IncomingHook {
			id,
			event_type: event.event_type.clone(),
			git_ref: None,
			commit_sha: None,
			tag_name: None,
			payload: payload_text(payload)?,
		};

		if event.event_type == "git.push" {
			let resource: PushResource = event
				.resource
				.map(serde_json::from_value)
				.transpose()
				.map_err(|e| ScmError::InvalidPayload(e.to_string()))?
				.ok_or_else(|| ScmError::InvalidPayload("git.push event without resource".into()))?;

			let update = resource
				.ref_updates
				.iter()
				.find(|u| u.name.starts_with("refs/tags/"))
				.or_else(|| resource.ref_updates.first());

			if let Some(update) = update {
				hook.tag_name = tag_from_ref(&update.name);
				// may name an annotated tag object; the publisher peels it
				hook.commit_sha = update
					.new_object_id
					.clone()
					.filter(|sha| !is_null_sha(sha));
				hook.git_ref = Some(update.name.clone());
			}
		}

		Ok(hook)
	}

	/// Accepts an HMAC `sha256=` signature or the static shared secret set at
	/// registration.
	fn verify_delivery_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
		let signature = signature.trim();
		if signature.starts_with(terrace_common_webhook::SHA256_PREFIX) {
			return terrace_common_webhook::verify_prefixed(secret.as_bytes(), payload, signature);
		}
		terrace_common_webhook::verify_token(secret, signature)
	}
}
