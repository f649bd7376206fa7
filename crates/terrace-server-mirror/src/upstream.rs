// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client for the Terraform provider registry protocol of an upstream registry.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{MirrorError, Result};

const DISCOVERY_PATH: &str = "/.well-known/terraform.json";
const PROVIDERS_SERVICE: &str = "providers.v1";
const DEFAULT_PROVIDERS_PATH: &str = "/v1/providers/";
const MAX_LISTING_PAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProvider {
	pub namespace: String,
	pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamPlatform {
	pub os: String,
	pub arch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamVersion {
	pub version: String,
	#[serde(default)]
	pub protocols: Vec<String>,
	#[serde(default)]
	pub platforms: Vec<UpstreamPlatform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpgPublicKey {
	pub key_id: String,
	pub ascii_armor: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningKeys {
	#[serde(default)]
	pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// Download metadata for one provider version and platform.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageInfo {
	#[serde(default)]
	pub protocols: Vec<String>,
	pub os: String,
	pub arch: String,
	pub filename: String,
	pub download_url: String,
	pub shasums_url: String,
	pub shasums_signature_url: String,
	pub shasum: String,
	#[serde(default)]
	pub signing_keys: SigningKeys,
}

impl PackageInfo {
	pub fn armored_keys(&self) -> Vec<String> {
		self
			.signing_keys
			.gpg_public_keys
			.iter()
			.map(|k| k.ascii_armor.clone())
			.collect()
	}

	pub fn key_id(&self) -> Option<&str> {
		self.signing_keys.gpg_public_keys.first().map(|k| k.key_id.as_str())
	}
}

/// Bytes written by [`UpstreamClient::download_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
	pub sha256: String,
	pub size: u64,
}

#[derive(Deserialize)]
struct ListingMeta {
	next_url: Option<String>,
}

#[derive(Deserialize)]
struct ListingEntry {
	namespace: String,
	name: String,
}

#[derive(Deserialize)]
struct ProviderListing {
	#[serde(default)]
	providers: Vec<ListingEntry>,
	meta: Option<ListingMeta>,
}

#[derive(Deserialize)]
struct VersionListing {
	versions: Vec<UpstreamVersion>,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
	base: Url,
	client: Client,
	download_client: Client,
}

impl UpstreamClient {
	pub fn new(upstream_url: &str, request_timeout: Duration, download_timeout: Duration) -> Result<Self> {
		let base = Url::parse(upstream_url).map_err(|e| MirrorError::InvalidResponse {
			operation: "upstream_url",
			message: format!("{upstream_url:?}: {e}"),
		})?;
		let build = |timeout| {
			terrace_common_http::new_client_with_timeout(timeout).map_err(|e| MirrorError::Network {
				operation: "client",
				message: e.to_string(),
			})
		};
		Ok(Self {
			base,
			client: build(request_timeout)?,
			download_client: build(download_timeout)?,
		})
	}

	/// Resolve the `providers.v1` service root, falling back to `/v1/providers/`
	/// when the upstream has no discovery document.
	#[instrument(skip(self), fields(upstream = %self.base))]
	pub async fn discover(&self) -> Result<ProvidersApi> {
		let url = self.join("discovery", DISCOVERY_PATH)?;
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| MirrorError::from_reqwest("discovery", e))?;

		let path = if response.status() == reqwest::StatusCode::NOT_FOUND {
			debug!("no discovery document, using default providers path");
			DEFAULT_PROVIDERS_PATH.to_string()
		} else {
			let document: serde_json::Value = decode("discovery", checked("discovery", response).await?).await?;
			document
				.get(PROVIDERS_SERVICE)
				.and_then(|v| v.as_str())
				.ok_or_else(|| MirrorError::InvalidResponse {
					operation: "discovery",
					message: format!("upstream does not offer {PROVIDERS_SERVICE}"),
				})?
				.to_string()
		};

		let mut root = self.join("discovery", &path)?;
		if !root.path().ends_with('/') {
			root.set_path(&format!("{}/", root.path()));
		}
		Ok(ProvidersApi {
			root,
			client: self.clone(),
		})
	}

	fn join(&self, operation: &'static str, reference: &str) -> Result<Url> {
		self.base.join(reference).map_err(|e| MirrorError::InvalidResponse {
			operation,
			message: format!("bad URL {reference:?}: {e}"),
		})
	}

	async fn get_json<T: DeserializeOwned>(&self, operation: &'static str, url: Url) -> Result<T> {
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| MirrorError::from_reqwest(operation, e))?;
		decode(operation, checked(operation, response).await?).await
	}

	#[instrument(skip(self), fields(url = %url))]
	pub async fn fetch_bytes(&self, operation: &'static str, url: &str) -> Result<Vec<u8>> {
		let url = self.join(operation, url)?;
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| MirrorError::from_reqwest(operation, e))?;
		let bytes = checked(operation, response)
			.await?
			.bytes()
			.await
			.map_err(|e| MirrorError::from_reqwest(operation, e))?;
		Ok(bytes.to_vec())
	}

	/// Stream `url` into `target`, hashing as it is written.
	#[instrument(skip(self, target), fields(url = %url))]
	pub async fn download_to(&self, url: &str, target: &Path) -> Result<Downloaded> {
		let url = self.join("download", url)?;
		let response = self
			.download_client
			.get(url)
			.send()
			.await
			.map_err(|e| MirrorError::from_reqwest("download", e))?;
		let mut body = checked("download", response).await?.bytes_stream();

		let mut file = tokio::fs::File::create(target).await?;
		let mut hasher = Sha256::new();
		let mut size = 0u64;
		while let Some(chunk) = body.next().await {
			let chunk = chunk.map_err(|e| MirrorError::from_reqwest("download", e))?;
			hasher.update(&chunk);
			file.write_all(&chunk).await?;
			size += chunk.len() as u64;
		}
		file.flush().await?;

		Ok(Downloaded {
			sha256: hex::encode(hasher.finalize()),
			size,
		})
	}
}

/// Provider registry endpoints below a discovered service root.
#[derive(Debug, Clone)]
pub struct ProvidersApi {
	root: Url,
	client: UpstreamClient,
}

impl ProvidersApi {
	pub fn root(&self) -> &Url {
		&self.root
	}

	fn endpoint(&self, operation: &'static str, segments: &[&str]) -> Result<Url> {
		let mut url = self.root.clone();
		{
			let mut path = url.path_segments_mut().map_err(|_| MirrorError::InvalidResponse {
				operation,
				message: "providers service URL cannot have path segments".to_string(),
			})?;
			path.pop_if_empty();
			path.extend(segments);
		}
		Ok(url)
	}

	/// Providers published upstream, optionally restricted to one namespace.
	/// Follows `meta.next_url` pagination.
	#[instrument(skip(self))]
	pub async fn list_providers(&self, namespace: Option<&str>) -> Result<Vec<UpstreamProvider>> {
		let mut url = match namespace {
			Some(ns) => self.endpoint("list_providers", &[ns])?,
			None => self.root.clone(),
		};

		let mut providers = Vec::new();
		for _ in 0..MAX_LISTING_PAGES {
			let page: ProviderListing = self.client.get_json("list_providers", url.clone()).await?;
			providers.extend(page.providers.into_iter().map(|p| UpstreamProvider {
				namespace: p.namespace,
				name: p.name,
			}));
			match page.meta.and_then(|m| m.next_url).filter(|n| !n.is_empty()) {
				Some(next) => {
					url = url.join(&next).map_err(|e| MirrorError::InvalidResponse {
						operation: "list_providers",
						message: format!("bad next_url: {e}"),
					})?;
				}
				None => return Ok(providers),
			}
		}
		debug!(pages = MAX_LISTING_PAGES, "provider listing truncated");
		Ok(providers)
	}

	#[instrument(skip(self))]
	pub async fn list_versions(&self, namespace: &str, name: &str) -> Result<Vec<UpstreamVersion>> {
		let url = self.endpoint("list_versions", &[namespace, name, "versions"])?;
		let listing: VersionListing = self.client.get_json("list_versions", url).await?;
		Ok(listing.versions)
	}

	#[instrument(skip(self))]
	pub async fn package(&self, namespace: &str, name: &str, version: &str, os: &str, arch: &str) -> Result<PackageInfo> {
		let url = self.endpoint("package", &[namespace, name, version, "download", os, arch])?;
		self.client.get_json("package", url).await
	}

	pub fn client(&self) -> &UpstreamClient {
		&self.client
	}
}

async fn checked(operation: &'static str, response: Response) -> Result<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let message = terrace_common_http::error_message(response).await;
	Err(MirrorError::Upstream {
		operation,
		status: status.as_u16(),
		message,
	})
}

async fn decode<T: DeserializeOwned>(operation: &'static str, response: Response) -> Result<T> {
	response.json::<T>().await.map_err(|e| MirrorError::InvalidResponse {
		operation,
		message: e.without_url().to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use wiremock::matchers::{method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn client(server: &MockServer) -> UpstreamClient {
		UpstreamClient::new(&server.uri(), Duration::from_secs(5), Duration::from_secs(5)).unwrap()
	}

	async fn discovery(server: &MockServer, service: &str) {
		Mock::given(method("GET"))
			.and(path(DISCOVERY_PATH))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "providers.v1": service })))
			.mount(server)
			.await;
	}

	#[tokio::test]
	async fn test_discovery_and_versions() {
		let server = MockServer::start().await;
		discovery(&server, "/v1/providers/").await;
		Mock::given(method("GET"))
			.and(path("/v1/providers/acme/widget/versions"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"versions": [
					{ "version": "1.0.0", "protocols": ["5.0"], "platforms": [{ "os": "linux", "arch": "amd64" }] },
					{ "version": "0.9.0" }
				]
			})))
			.mount(&server)
			.await;

		let api = client(&server).discover().await.unwrap();
		let versions = api.list_versions("acme", "widget").await.unwrap();
		assert_eq!(versions.len(), 2);
		assert_eq!(versions[0].platforms[0].os, "linux");
		assert!(versions[1].platforms.is_empty());
	}

	#[tokio::test]
	async fn test_missing_discovery_uses_default_root() {
		let server = MockServer::start().await;
		let api = client(&server).discover().await.unwrap();
		assert_eq!(api.root().path(), DEFAULT_PROVIDERS_PATH);
	}

	#[tokio::test]
	async fn test_discovery_without_providers_service() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path(DISCOVERY_PATH))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "modules.v1": "/v1/modules/" })))
			.mount(&server)
			.await;
		assert!(matches!(
			client(&server).discover().await,
			Err(MirrorError::InvalidResponse { operation: "discovery", .. })
		));
	}

	#[tokio::test]
	async fn test_provider_listing_follows_next_url() {
		let server = MockServer::start().await;
		discovery(&server, "/registry/v1/providers").await;
		Mock::given(method("GET"))
			.and(path("/registry/v1/providers/acme"))
			.and(query_param("offset", "1"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"meta": { "next_url": null },
				"providers": [{ "namespace": "acme", "name": "gadget" }]
			})))
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/registry/v1/providers/acme"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"meta": { "next_url": "/registry/v1/providers/acme?offset=1" },
				"providers": [{ "namespace": "acme", "name": "widget" }]
			})))
			.mount(&server)
			.await;

		let api = client(&server).discover().await.unwrap();
		let providers = api.list_providers(Some("acme")).await.unwrap();
		let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
		assert_eq!(names, vec!["widget", "gadget"]);
	}

	#[tokio::test]
	async fn test_package_and_error_status() {
		let server = MockServer::start().await;
		discovery(&server, "/v1/providers/").await;
		Mock::given(method("GET"))
			.and(path("/v1/providers/acme/widget/1.0.0/download/linux/amd64"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"protocols": ["5.0"],
				"os": "linux",
				"arch": "amd64",
				"filename": "terraform-provider-widget_1.0.0_linux_amd64.zip",
				"download_url": "/files/widget.zip",
				"shasums_url": "/files/SHA256SUMS",
				"shasums_signature_url": "/files/SHA256SUMS.sig",
				"shasum": "ab",
				"signing_keys": { "gpg_public_keys": [{ "key_id": "D9F763BDE20DC6C5", "ascii_armor": "KEY" }] }
			})))
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/v1/providers/acme/widget/2.0.0/download/linux/amd64"))
			.respond_with(ResponseTemplate::new(404).set_body_string("no such version"))
			.mount(&server)
			.await;

		let api = client(&server).discover().await.unwrap();
		let package = api.package("acme", "widget", "1.0.0", "linux", "amd64").await.unwrap();
		assert_eq!(package.key_id(), Some("D9F763BDE20DC6C5"));
		assert_eq!(package.armored_keys(), vec!["KEY".to_string()]);

		match api.package("acme", "widget", "2.0.0", "linux", "amd64").await {
			Err(MirrorError::Upstream { status, message, .. }) => {
				assert_eq!(status, 404);
				assert!(message.contains("no such version"));
			}
			other => panic!("expected upstream error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_download_hashes_streamed_bytes() {
		let server = MockServer::start().await;
		let body = vec![7u8; 200_000];
		Mock::given(method("GET"))
			.and(path("/files/blob.zip"))
			.respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let target = dir.path().join("blob.zip");
		let downloaded = client(&server).download_to("/files/blob.zip", &target).await.unwrap();

		assert_eq!(downloaded.size, body.len() as u64);
		assert_eq!(downloaded.sha256, hex::encode(Sha256::digest(&body)));
		assert_eq!(std::fs::read(&target).unwrap(), body);
	}
}
