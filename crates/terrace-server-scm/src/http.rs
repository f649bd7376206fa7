// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request plumbing shared by every connector.

use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use terrace_common_secret::SecretString;
use tracing::debug;

use crate::error::{Result, ScmError};
use crate::types::{AccessToken, ArchiveStream, ConnectorSettings};

#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
	client: Client,
	archive_client: Client,
}

impl ApiClient {
	pub(crate) fn new(settings: &ConnectorSettings) -> Result<Self> {
		let client = terrace_common_http::new_client_with_timeout(settings.request_timeout)
			.map_err(|e| ScmError::Config(format!("failed to build HTTP client: {e}")))?;
		let archive_client = terrace_common_http::new_client_with_timeout(settings.archive_timeout)
			.map_err(|e| ScmError::Config(format!("failed to build archive client: {e}")))?;
		Ok(Self { client, archive_client })
	}

	pub(crate) fn get(&self, url: &str, token: &SecretString) -> RequestBuilder {
		self.client.get(url).bearer_auth(token.expose())
	}

	pub(crate) fn post(&self, url: &str, token: &SecretString) -> RequestBuilder {
		self.client.post(url).bearer_auth(token.expose())
	}

	pub(crate) fn delete(&self, url: &str, token: &SecretString) -> RequestBuilder {
		self.client.delete(url).bearer_auth(token.expose())
	}

	pub(crate) fn archive_get(&self, url: &str, token: &SecretString) -> RequestBuilder {
		self.archive_client.get(url).bearer_auth(token.expose())
	}

	pub(crate) fn plain_post(&self, url: &str) -> RequestBuilder {
		self.client.post(url)
	}

	/// Send a request, mapping transport errors and non-success statuses.
	pub(crate) async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
		let response = request
			.send()
			.await
			.map_err(|e| ScmError::from_reqwest(operation, e))?;

		let status = response.status();
		if status.is_success() {
			return Ok(response);
		}

		let message = terrace_common_http::error_message(response).await;
		debug!(operation, status = status.as_u16(), "SCM request failed");
		Err(ScmError::from_status(operation, status, message))
	}

	pub(crate) async fn json<T: DeserializeOwned>(
		&self,
		operation: &'static str,
		request: RequestBuilder,
	) -> Result<(T, HeaderMap)> {
		let response = self.send(operation, request).await?;
		let headers = response.headers().clone();
		let body = response
			.json::<T>()
			.await
			.map_err(|e| ScmError::InvalidResponse {
				operation,
				message: e.without_url().to_string(),
			})?;
		Ok((body, headers))
	}

	pub(crate) async fn stream(&self, operation: &'static str, request: RequestBuilder) -> Result<ArchiveStream> {
		let response = self.send(operation, request).await?;
		let stream = response
			.bytes_stream()
			.map(|chunk| chunk.map_err(|e| std::io::Error::other(e.without_url())));
		Ok(stream.boxed())
	}

	/// POST an OAuth token request and decode either the token or the
	/// provider's `{error, error_description}` body.
	pub(crate) async fn exchange_token(
		&self,
		operation: &'static str,
		token_url: &str,
		form: &[(&str, &str)],
		refreshing: bool,
	) -> Result<AccessToken> {
		let fail = |message: String| {
			if refreshing {
				ScmError::TokenRefreshFailed(message)
			} else {
				ScmError::Api {
					operation,
					status: 400,
					message,
				}
			}
		};

		let response = self
			.plain_post(token_url)
			.header(ACCEPT, "application/json")
			.form(form)
			.send()
			.await
			.map_err(|e| match ScmError::from_reqwest(operation, e) {
				ScmError::Network { message, .. } if refreshing => ScmError::TokenRefreshFailed(message),
				ScmError::Timeout { .. } if refreshing => ScmError::TokenRefreshFailed(format!("{operation} timed out")),
				other => other,
			})?;

		let status = response.status();
		let body = response.text().await.map_err(|e| fail(e.without_url().to_string()))?;

		if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(&body) {
			let message = match err.error_description {
				Some(desc) => format!("{}: {desc}", err.error),
				None => err.error,
			};
			return Err(fail(message));
		}

		if !status.is_success() {
			return Err(fail(format!("token endpoint returned status {}", status.as_u16())));
		}

		let token: OAuthTokenResponse = serde_json::from_str(&body).map_err(|e| ScmError::InvalidResponse {
			operation,
			message: format!("failed to parse token response: {e}"),
		})?;

		Ok(token.into_access_token())
	}
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
	error: String,
	error_description: Option<String>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
	#[serde(deserialize_with = "deserialize_secret_string")]
	access_token: SecretString,
	#[serde(default, deserialize_with = "deserialize_optional_secret_string")]
	refresh_token: Option<SecretString>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	scope: Option<String>,
}

impl OAuthTokenResponse {
	fn into_access_token(self) -> AccessToken {
		let scopes = self
			.scope
			.as_deref()
			.map(|s| {
				s.split([',', ' '])
					.filter(|s| !s.is_empty())
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default();

		AccessToken {
			access: self.access_token,
			refresh: self.refresh_token.filter(|t| !t.is_empty()),
			token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
			expires_at: self
				.expires_in
				.filter(|s| *s > 0)
				.map(|s| Utc::now() + chrono::Duration::seconds(s)),
			scopes,
		}
	}
}

fn deserialize_secret_string<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s = String::deserialize(deserializer)?;
	Ok(SecretString::new(s))
}

fn deserialize_optional_secret_string<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s = Option::<String>::deserialize(deserializer)?;
	Ok(s.map(SecretString::new))
}

/// Follow an RFC 8288 `Link` header to its `rel="next"` target.
pub(crate) fn has_next_link(headers: &HeaderMap) -> bool {
	headers
		.get_all(reqwest::header::LINK)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\""))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use terrace_server_db::ScmKind;
	use wiremock::matchers::{body_string_contains, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn api() -> ApiClient {
		let mut settings = ConnectorSettings::new(ScmKind::GitHub, "id", SecretString::new("secret".into()));
		settings.request_timeout = Duration::from_secs(5);
		ApiClient::new(&settings).unwrap()
	}

	#[test]
	fn test_has_next_link() {
		let mut headers = HeaderMap::new();
		headers.insert(
			reqwest::header::LINK,
			"<https://api.github.com/x?page=2>; rel=\"next\", <https://api.github.com/x?page=5>; rel=\"last\""
				.parse()
				.unwrap(),
		);
		assert!(has_next_link(&headers));

		let mut last = HeaderMap::new();
		last.insert(
			reqwest::header::LINK,
			"<https://api.github.com/x?page=1>; rel=\"prev\"".parse().unwrap(),
		);
		assert!(!has_next_link(&last));
		assert!(!has_next_link(&HeaderMap::new()));
	}

	#[tokio::test]
	async fn test_exchange_token_parses_scopes_and_expiry() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/token"))
			.and(body_string_contains("grant_type=authorization_code"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": "at-123",
				"refresh_token": "rt-456",
				"token_type": "bearer",
				"expires_in": 3600,
				"scope": "repo,admin:repo_hook"
			})))
			.mount(&server)
			.await;

		let token = api()
			.exchange_token(
				"complete_authorization",
				&format!("{}/token", server.uri()),
				&[("grant_type", "authorization_code"), ("code", "c")],
				false,
			)
			.await
			.unwrap();

		assert_eq!(token.access.expose(), "at-123");
		assert_eq!(token.refresh.unwrap().expose(), "rt-456");
		assert_eq!(token.scopes, vec!["repo", "admin:repo_hook"]);
		assert!(token.expires_at.unwrap() > Utc::now());
	}

	#[tokio::test]
	async fn test_refresh_error_is_distinguished() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/token"))
			.respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
				"error": "invalid_grant",
				"error_description": "refresh token expired"
			})))
			.mount(&server)
			.await;

		let err = api()
			.exchange_token(
				"renew_token",
				&format!("{}/token", server.uri()),
				&[("grant_type", "refresh_token"), ("refresh_token", "rt-secret")],
				true,
			)
			.await
			.unwrap_err();

		match err {
			ScmError::TokenRefreshFailed(msg) => {
				assert!(msg.contains("invalid_grant"));
				assert!(!msg.contains("rt-secret"));
			}
			other => panic!("expected TokenRefreshFailed, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_send_maps_status() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/missing"))
			.respond_with(ResponseTemplate::new(404).set_body_string("no such repo"))
			.mount(&server)
			.await;

		let client = api();
		let token = SecretString::new("t".into());
		let err = client
			.send("fetch_repository", client.get(&format!("{}/missing", server.uri()), &token))
			.await
			.unwrap_err();
		assert!(matches!(err, ScmError::NotFound(ref m) if m.contains("no such repo")));
	}
}
