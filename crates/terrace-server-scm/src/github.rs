// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! GitHub and GitHub Enterprise Server connector.

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
use crate::http::{has_next_link, ApiClient};
use crate::types::{
	is_null_sha, tag_from_ref, AccessToken, ArchiveFormat, ArchiveStream, Branch, Commit, ConnectorSettings,
	IncomingHook, Page, Pagination, Repository, Tag, WebhookConfig, WebhookInfo,
};

const GITHUB_AUTH_URL: &str = "https://github.com";
const GITHUB_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const ACCEPT_JSON: &str = "application/vnd.github+json";

/// Annotated tags may point at other tags; chains deeper than this are rejected.
const MAX_TAG_DEPTH: usize = 4;

pub struct GitHubConnector {
	settings: ConnectorSettings,
	api: ApiClient,
	api_base: String,
	auth_base: String,
}

impl GitHubConnector {
	pub fn new(settings: ConnectorSettings) -> Result<Self> {
		let api = ApiClient::new(&settings)?;
		let base = settings.trimmed_base_url();
		let api_base = match &base {
			Some(b) => format!("{b}/api/v3"),
			None => GITHUB_API_URL.to_string(),
		};
		let auth_base = settings
			.auth_base_url
			.clone()
			.or(base)
			.unwrap_or_else(|| GITHUB_AUTH_URL.to_string())
			.trim_end_matches('/')
			.to_string();

		Ok(Self {
			settings,
			api,
			api_base,
			auth_base,
		})
	}

	fn repo_url(&self, owner: &str, repo: &str) -> String {
		format!("{}/repos/{}/{}", self.api_base, encode(owner), encode(repo))
	}

	fn get(&self, url: &str, token: &SecretString) -> reqwest::RequestBuilder {
		self
			.api
			.get(url, token)
			.header("Accept", ACCEPT_JSON)
			.header("X-GitHub-Api-Version", API_VERSION)
	}

	async fn resolve_tag_object(&self, token: &SecretString, owner: &str, repo: &str, mut object: GitObject) -> Result<String> {
		for _ in 0..MAX_TAG_DEPTH {
			if object.object_type != "tag" {
				return Ok(object.sha);
			}
			let url = format!("{}/git/tags/{}", self.repo_url(owner, repo), object.sha);
			let (tag, _) = self
				.api
				.json::<AnnotatedTag>("fetch_tag_by_name", self.get(&url, token))
				.await?;
			object = tag.object;
		}
		Err(ScmError::InvalidResponse {
			operation: "fetch_tag_by_name",
			message: "annotated tag chain too deep".to_string(),
		})
	}
}

#[derive(Deserialize)]
struct GitHubOwner {
	login: String,
}

#[derive(Deserialize)]
struct GitHubRepository {
	id: u64,
	name: String,
	full_name: String,
	owner: GitHubOwner,
	default_branch: Option<String>,
	clone_url: Option<String>,
	html_url: Option<String>,
	#[serde(default)]
	private: bool,
}

impl From<GitHubRepository> for Repository {
	fn from(r: GitHubRepository) -> Self {
		Repository {
			id: r.id.to_string(),
			owner: r.owner.login,
			name: r.name,
			full_name: r.full_name,
			default_branch: r.default_branch,
			clone_url: r.clone_url,
			web_url: r.html_url,
			private: r.private,
		}
	}
}

#[derive(Deserialize)]
struct SearchResponse {
	total_count: u64,
	items: Vec<GitHubRepository>,
}

#[derive(Deserialize)]
struct CommitRef {
	sha: String,
}

#[derive(Deserialize)]
struct NamedRef {
	name: String,
	commit: CommitRef,
}

#[derive(Deserialize)]
struct GitObject {
	#[serde(rename = "type")]
	object_type: String,
	sha: String,
}

#[derive(Deserialize)]
struct GitRef {
	object: GitObject,
}

#[derive(Deserialize)]
struct AnnotatedTag {
	object: GitObject,
}

#[derive(Deserialize)]
struct CommitAuthor {
	name: Option<String>,
	email: Option<String>,
	date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CommitDetail {
	message: String,
	author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct CommitResponse {
	sha: String,
	commit: CommitDetail,
}

#[derive(Deserialize)]
struct HookResponse {
	id: u64,
	#[serde(default = "default_true")]
	active: bool,
}

fn default_true() -> bool {
	true
}

#[derive(Deserialize)]
struct PushPayload {
	#[serde(rename = "ref")]
	git_ref: Option<String>,
	after: Option<String>,
	#[serde(default)]
	deleted: bool,
	head_commit: Option<PushCommit>,
}

#[derive(Deserialize)]
struct PushCommit {
	id: String,
}

#[async_trait]
impl ScmConnector for GitHubConnector {
	fn kind(&self) -> ScmKind {
		ScmKind::GitHub
	}

	fn authorization_url(&self, state: &str, scopes: &[String]) -> Result<String> {
		let mut url = Url::parse(&format!("{}/login/oauth/authorize", self.auth_base))
			.map_err(|e| ScmError::Config(format!("invalid GitHub URL: {e}")))?;

		url
			.query_pairs_mut()
			.append_pair("client_id", &self.settings.client_id)
			.append_pair("redirect_uri", &self.settings.redirect_uri)
			.append_pair("scope", &scopes.join(" "))
			.append_pair("state", state);

		Ok(url.to_string())
	}

	#[instrument(skip(self, code))]
	async fn complete_authorization(&self, code: &str) -> Result<AccessToken> {
		let token_url = format!("{}/login/oauth/access_token", self.auth_base);
		self
			.api
			.exchange_token(
				"complete_authorization",
				&token_url,
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("code", code),
					("redirect_uri", self.settings.redirect_uri.as_str()),
				],
				false,
			)
			.await
	}

	#[instrument(skip(self, refresh_token))]
	async fn renew_token(&self, refresh_token: &SecretString) -> Result<AccessToken> {
		let token_url = format!("{}/login/oauth/access_token", self.auth_base);
		self
			.api
			.exchange_token(
				"renew_token",
				&token_url,
				&[
					("client_id", self.settings.client_id.as_str()),
					("client_secret", self.settings.client_secret.expose().as_str()),
					("grant_type", "refresh_token"),
					("refresh_token", refresh_token.expose().as_str()),
				],
				true,
			)
			.await
	}

	#[instrument(skip(self, token))]
	async fn fetch_repositories(&self, token: &SecretString, pagination: Pagination) -> Result<Page<Repository>> {
		let url = format!("{}/user/repos", self.api_base);
		let request = self.get(&url, token).query(&[
			("per_page", pagination.page_size.to_string()),
			("page", pagination.page.to_string()),
			("sort", "full_name".to_string()),
		]);
		let (repos, headers) = self
			.api
			.json::<Vec<GitHubRepository>>("fetch_repositories", request)
			.await?;
		Ok(Page::new(
			repos.into_iter().map(Repository::from).collect(),
			has_next_link(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_repository(&self, token: &SecretString, owner: &str, repo: &str) -> Result<Repository> {
		let (repo, _) = self
			.api
			.json::<GitHubRepository>("fetch_repository", self.get(&self.repo_url(owner, repo), token))
			.await?;
		Ok(repo.into())
	}

	#[instrument(skip(self, token))]
	async fn search_repositories(
		&self,
		token: &SecretString,
		query: &str,
		pagination: Pagination,
	) -> Result<Page<Repository>> {
		let url = format!("{}/search/repositories", self.api_base);
		let request = self.get(&url, token).query(&[
			("q", format!("{query} in:name")),
			("per_page", pagination.page_size.to_string()),
			("page", pagination.page.to_string()),
		]);
		let (found, _) = self
			.api
			.json::<SearchResponse>("search_repositories", request)
			.await?;
		let seen = u64::from(pagination.offset()) + found.items.len() as u64;
		Ok(Page::new(
			found.items.into_iter().map(Repository::from).collect(),
			seen < found.total_count,
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
		let request = self.get(&url, token).query(&[
			("per_page", pagination.page_size),
			("page", pagination.page),
		]);
		let (branches, headers) = self
			.api
			.json::<Vec<NamedRef>>("fetch_branches", request)
			.await?;
		Ok(Page::new(
			branches
				.into_iter()
				.map(|b| Branch {
					name: b.name,
					commit_sha: b.commit.sha,
				})
				.collect(),
			has_next_link(&headers),
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
		let request = self.get(&url, token).query(&[
			("per_page", pagination.page_size),
			("page", pagination.page),
		]);
		let (tags, headers) = self.api.json::<Vec<NamedRef>>("fetch_tags", request).await?;
		Ok(Page::new(
			tags
				.into_iter()
				.map(|t| Tag {
					name: t.name,
					commit_sha: t.commit.sha,
				})
				.collect(),
			has_next_link(&headers),
		))
	}

	#[instrument(skip(self, token))]
	async fn fetch_tag_by_name(&self, token: &SecretString, owner: &str, repo: &str, tag: &str) -> Result<Tag> {
		let url = format!("{}/git/ref/tags/{}", self.repo_url(owner, repo), encode(tag));
		let (git_ref, _) = self
			.api
			.json::<GitRef>("fetch_tag_by_name", self.get(&url, token))
			.await?;
		let commit_sha = self.resolve_tag_object(token, owner, repo, git_ref.object).await?;
		Ok(Tag {
			name: tag.to_string(),
			commit_sha,
		})
	}

	#[instrument(skip(self, token))]
	async fn fetch_commit(&self, token: &SecretString, owner: &str, repo: &str, sha: &str) -> Result<Commit> {
		let url = format!("{}/commits/{}", self.repo_url(owner, repo), encode(sha));
		let (commit, _) = self
			.api
			.json::<CommitResponse>("fetch_commit", self.get(&url, token))
			.await?;
		let author = commit.commit.author;
		Ok(Commit {
			sha: commit.sha,
			message: commit.commit.message,
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
		let kind = match format {
			ArchiveFormat::TarGz => "tarball",
			ArchiveFormat::Zip => "zipball",
		};
		let url = format!("{}/{kind}/{}", self.repo_url(owner, repo), encode(git_ref));
		let request = self
			.api
			.archive_get(&url, token)
			.header("X-GitHub-Api-Version", API_VERSION);
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
		let url = format!("{}/hooks", self.repo_url(owner, repo));
		let body = serde_json::json!({
			"name": "web",
			"active": true,
			"events": config.events,
			"config": {
				"url": config.url,
				"content_type": "json",
				"secret": config.secret.expose(),
				"insecure_ssl": "0",
			}
		});
		let request = self
			.api
			.post(&url, token)
			.header("Accept", ACCEPT_JSON)
			.header("X-GitHub-Api-Version", API_VERSION)
			.json(&body);

		let (hook, _) = self
			.api
			.json::<HookResponse>("register_webhook", request)
			.await
			.map_err(|e| ScmError::WebhookSetupFailed(e.to_string()))?;

		debug!(hook_id = hook.id, "registered GitHub webhook");
		Ok(WebhookInfo {
			id: hook.id.to_string(),
			active: hook.active,
		})
	}

	#[instrument(skip(self, token))]
	async fn remove_webhook(&self, token: &SecretString, owner: &str, repo: &str, webhook_id: &str) -> Result<()> {
		let url = format!("{}/hooks/{}", self.repo_url(owner, repo), encode(webhook_id));
		let request = self
			.api
			.delete(&url, token)
			.header("X-GitHub-Api-Version", API_VERSION);
		match self.api.send("remove_webhook", request).await {
			Ok(_) => Ok(()),
			Err(ScmError::NotFound(_)) => Err(ScmError::WebhookNotFound(webhook_id.to_string())),
			Err(e) => Err(e),
		}
	}

	fn parse_delivery(&self, payload: &[u8], headers: &HeaderMap) -> Result<IncomingHook> {
		let id = header_str(headers, "X-GitHub-Delivery")
			.ok_or_else(|| ScmError::InvalidPayload("missing X-GitHub-Delivery header".into()))?;
		let event_type = header_str(headers, "X-GitHub-Event")
			.ok_or_else(|| ScmError::InvalidPayload("missing X-GitHub-Event header".into()))?;

		let mut hook = IncomingHook {
			id: id.to_string(),
			event_type: event_type.to_string(),
			git_ref: None,
			commit_sha: None,
			tag_name: None,
			payload: payload_text(payload)?,
		};

		if event_type == "push" {
			let push: PushPayload = parse_json(payload)?;
			hook.tag_name = push.git_ref.as_deref().and_then(tag_from_ref);
			// `after` names the tag object for annotated tags; head_commit is the commit
			hook.commit_sha = push
				.head_commit
				.map(|c| c.id)
				.or(push.after)
				.filter(|sha| !push.deleted && !is_null_sha(sha));
			hook.git_ref = push.git_ref;
		} else {
			// ping and other events still need a well-formed body
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

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;
	use wiremock::matchers::{body_string_contains, header, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn connector(server: &MockServer) -> GitHubConnector {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "gh-client", SecretString::new("gh-secret".into()))
			.with_base_url(server.uri())
			.with_redirect_uri("https://registry.example/api/scm/callback");
		GitHubConnector::new(settings).unwrap()
	}

	fn token() -> SecretString {
		SecretString::new("gho_token".into())
	}

	fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
		let mut map = HeaderMap::new();
		for (k, v) in pairs {
			map.insert(*k, v.parse().unwrap());
		}
		map
	}

	#[test]
	fn test_public_github_endpoints() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()))
			.with_redirect_uri("https://registry.example/cb");
		let gh = GitHubConnector::new(settings).unwrap();
		assert_eq!(gh.api_base, "https://api.github.com");

		let url = gh.authorization_url("state-1", &["repo".into(), "admin:repo_hook".into()]).unwrap();
		assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
		assert!(url.contains("client_id=id"));
		assert!(url.contains("state=state-1"));
		assert!(url.contains("scope=repo+admin%3Arepo_hook"));
		assert!(!url.contains("client_secret"));
	}

	#[test]
	fn test_enterprise_api_base() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()))
			.with_base_url("https://ghe.example.com/");
		let gh = GitHubConnector::new(settings).unwrap();
		assert_eq!(gh.api_base, "https://ghe.example.com/api/v3");
		assert_eq!(gh.auth_base, "https://ghe.example.com");
	}

	#[tokio::test]
	async fn test_complete_authorization() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/login/oauth/access_token"))
			.and(body_string_contains("code=the-code"))
			.and(body_string_contains("client_secret=gh-secret"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": "gho_abc",
				"token_type": "bearer",
				"scope": "repo"
			})))
			.mount(&server)
			.await;

		let token = connector(&server).complete_authorization("the-code").await.unwrap();
		assert_eq!(token.access.expose(), "gho_abc");
		assert!(token.refresh.is_none());
		assert!(token.expires_at.is_none());
		assert_eq!(token.scopes, vec!["repo"]);
	}

	#[tokio::test]
	async fn test_fetch_repositories_pagination() {
		let server = MockServer::start().await;
		let next = format!("<{}/api/v3/user/repos?page=2>; rel=\"next\"", server.uri());
		Mock::given(method("GET"))
			.and(path("/api/v3/user/repos"))
			.and(query_param("page", "1"))
			.and(header("authorization", "Bearer gho_token"))
			.respond_with(
				ResponseTemplate::new(200)
					.insert_header("link", next.as_str())
					.set_body_json(serde_json::json!([{
						"id": 42,
						"name": "terraform-aws-vpc",
						"full_name": "acme/terraform-aws-vpc",
						"owner": {"login": "acme"},
						"default_branch": "main",
						"private": true
					}])),
			)
			.mount(&server)
			.await;

		let page = connector(&server)
			.fetch_repositories(&token(), Pagination::new(1, 1))
			.await
			.unwrap();
		assert!(page.more_pages);
		assert_eq!(page.items[0].full_name, "acme/terraform-aws-vpc");
		assert_eq!(page.items[0].id, "42");
		assert!(page.items[0].private);
	}

	#[tokio::test]
	async fn test_fetch_tag_by_name_peels_annotated_tag() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v3/repos/acme/vpc/git/ref/tags/v1.0.0"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"ref": "refs/tags/v1.0.0",
				"object": {"type": "tag", "sha": "tagobj"}
			})))
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/api/v3/repos/acme/vpc/git/tags/tagobj"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"sha": "tagobj",
				"object": {"type": "commit", "sha": "c0ffee"}
			})))
			.mount(&server)
			.await;

		let tag = connector(&server)
			.fetch_tag_by_name(&token(), "acme", "vpc", "v1.0.0")
			.await
			.unwrap();
		assert_eq!(tag.commit_sha, "c0ffee");
	}

	#[tokio::test]
	async fn test_download_archive_streams_bytes() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v3/repos/acme/vpc/tarball/c0ffee"))
			.respond_with(ResponseTemplate::new(200).set_body_bytes(b"tarball-bytes".to_vec()))
			.mount(&server)
			.await;

		let stream = connector(&server)
			.download_source_archive(&token(), "acme", "vpc", "c0ffee", ArchiveFormat::TarGz)
			.await
			.unwrap();
		let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
		assert_eq!(chunks.concat(), b"tarball-bytes");
	}

	#[tokio::test]
	async fn test_remove_missing_webhook() {
		let server = MockServer::start().await;
		Mock::given(method("DELETE"))
			.and(path("/api/v3/repos/acme/vpc/hooks/7"))
			.respond_with(ResponseTemplate::new(404))
			.mount(&server)
			.await;

		let err = connector(&server)
			.remove_webhook(&token(), "acme", "vpc", "7")
			.await
			.unwrap_err();
		assert!(matches!(err, ScmError::WebhookNotFound(id) if id == "7"));
	}

	#[tokio::test]
	async fn test_register_webhook_failure_is_distinguished() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/v3/repos/acme/vpc/hooks"))
			.respond_with(ResponseTemplate::new(422).set_body_string("Hook already exists"))
			.mount(&server)
			.await;

		let config = WebhookConfig {
			url: "https://registry.example/webhooks/scm/1/s".into(),
			secret: SecretString::new("whsec".into()),
			events: vec!["push".into()],
		};
		let err = connector(&server)
			.register_webhook(&token(), "acme", "vpc", &config)
			.await
			.unwrap_err();
		assert!(matches!(err, ScmError::WebhookSetupFailed(ref m) if !m.contains("whsec")));
	}

	#[test]
	fn test_parse_tag_push() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()));
		let gh = GitHubConnector::new(settings).unwrap();
		let payload = br#"{"ref":"refs/tags/v1.2.3","after":"abc123","deleted":false}"#;
		let hook = gh
			.parse_delivery(payload, &headers(&[("x-github-delivery", "d-1"), ("x-github-event", "push")]))
			.unwrap();
		assert_eq!(hook.id, "d-1");
		assert_eq!(hook.tag_name.as_deref(), Some("v1.2.3"));
		assert_eq!(hook.commit_sha.as_deref(), Some("abc123"));
		assert!(hook.is_tag_event());
	}

	#[test]
	fn test_parse_annotated_tag_push_uses_head_commit() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()));
		let gh = GitHubConnector::new(settings).unwrap();
		let payload = br#"{
			"ref": "refs/tags/v1.0.0",
			"after": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
			"deleted": false,
			"head_commit": {"id": "cccccccccccccccccccccccccccccccccccccccc", "message": "release"}
		}"#;
		let hook = gh
			.parse_delivery(payload, &headers(&[("x-github-delivery", "d-4"), ("x-github-event", "push")]))
			.unwrap();
		assert_eq!(hook.tag_name.as_deref(), Some("v1.0.0"));
		assert_eq!(hook.commit_sha.as_deref(), Some("cccccccccccccccccccccccccccccccccccccccc"));
	}

	#[test]
	fn test_parse_tag_deletion_is_not_tag_event() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()));
		let gh = GitHubConnector::new(settings).unwrap();
		let payload = br#"{"ref":"refs/tags/v1.2.3","after":"0000000000000000000000000000000000000000","deleted":true}"#;
		let hook = gh
			.parse_delivery(payload, &headers(&[("x-github-delivery", "d-2"), ("x-github-event", "push")]))
			.unwrap();
		assert!(!hook.is_tag_event());
	}

	#[test]
	fn test_parse_rejects_malformed() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()));
		let gh = GitHubConnector::new(settings).unwrap();
		let h = headers(&[("x-github-delivery", "d-3"), ("x-github-event", "push")]);
		assert!(matches!(gh.parse_delivery(b"{not json", &h), Err(ScmError::InvalidPayload(_))));
		assert!(matches!(
			gh.parse_delivery(b"{}", &HeaderMap::new()),
			Err(ScmError::InvalidPayload(_))
		));
	}

	#[test]
	fn test_verify_signature() {
		let settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("s".into()));
		let gh = GitHubConnector::new(settings).unwrap();
		let body = br#"{"ref":"refs/tags/v1.0.0"}"#;
		let sig = terrace_common_webhook::sign_prefixed(b"whsec", body);

		assert!(gh.verify_delivery_signature(body, &sig, "whsec"));
		assert!(!gh.verify_delivery_signature(body, &sig, "other"));
		assert!(!gh.verify_delivery_signature(b"{\"ref\":\"refs/tags/v1.0.1\"}", &sig, "whsec"));
		let bare = sig.trim_start_matches("sha256=");
		assert!(!gh.verify_delivery_signature(body, bare, "whsec"));
	}
}
