// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mirror synchronization runs.
//!
//! A run walks candidate providers, selects versions and platforms through the
//! mirror's filters, and copies each platform package only after its SHA-256
//! matches the signed `SHA256SUMS` of the upstream release. Every platform
//! package is an independent unit of work: a failure is recorded and the run
//! moves on to its siblings.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use terrace_server_db::{
	ApprovalStatus, DbError, MirrorApprovalRequest, MirrorConfig, MirrorStore, MirrorSyncHistory, MirroredProvider,
	MirroredProviderVersion, Provider, ProviderPlatform, ProviderStore, ProviderVersion, SyncOutcome, SyncStatus,
};
use terrace_server_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::checksum::{ensure_matches, ShaSums};
use crate::error::{MirrorError, Result};
use crate::filter::{NameFilter, PlatformFilter, VersionFilter};
use crate::hash::h1_from_zip;
use crate::policy::{approval_satisfies, evaluate, PolicyDecision};
use crate::signature::verify_detached;
use crate::upstream::{PackageInfo, ProvidersApi, UpstreamClient, UpstreamPlatform, UpstreamProvider, UpstreamVersion};

const STATUS_HISTORY_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct SyncSettings {
	pub request_timeout: Duration,
	pub download_timeout: Duration,
	pub approval_ttl: chrono::Duration,
	pub scratch_parent: Option<PathBuf>,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(60),
			download_timeout: Duration::from_secs(600),
			approval_ttl: chrono::Duration::days(30),
			scratch_parent: None,
		}
	}
}

/// Optional narrowing of a manual run to one namespace and/or provider type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTarget {
	pub namespace: Option<String>,
	pub provider: Option<String>,
}

impl SyncTarget {
	pub fn new(namespace: Option<String>, provider: Option<String>) -> Self {
		let clean = |v: Option<String>| {
			v.map(|s| s.trim().to_ascii_lowercase())
				.filter(|s| !s.is_empty())
		};
		Self {
			namespace: clean(namespace),
			provider: clean(provider),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum ArtifactOutcome {
	Synced,
	Failed(String),
}

/// One platform package handled by a run.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
	pub namespace: String,
	pub provider: String,
	pub version: String,
	pub os: String,
	pub arch: String,
	pub outcome: ArtifactOutcome,
}

/// A provider the run did not copy, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedProvider {
	pub namespace: String,
	pub provider: String,
	pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
	pub mirror_id: Uuid,
	pub history_id: Uuid,
	pub status: SyncStatus,
	pub artifacts: Vec<ArtifactResult>,
	pub skipped: Vec<SkippedProvider>,
	/// Provider-level failures that happened before any platform was attempted.
	pub errors: Vec<String>,
}

impl SyncReport {
	pub fn synced(&self) -> usize {
		self
			.artifacts
			.iter()
			.filter(|a| a.outcome == ArtifactOutcome::Synced)
			.count()
	}

	pub fn failed(&self) -> usize {
		self
			.artifacts
			.iter()
			.filter(|a| matches!(a.outcome, ArtifactOutcome::Failed(_)))
			.count()
			+ self.errors.len()
	}

	fn first_error(&self) -> Option<String> {
		self.errors.first().cloned().or_else(|| {
			self.artifacts.iter().find_map(|a| match &a.outcome {
				ArtifactOutcome::Failed(e) => Some(format!(
					"{}/{} {} {}/{}: {e}",
					a.namespace, a.provider, a.version, a.os, a.arch
				)),
				ArtifactOutcome::Synced => None,
			})
		})
	}

	fn outcome(&self, cancelled: bool) -> SyncOutcome {
		let synced = self.synced();
		let failed = self.failed();
		let status = if cancelled {
			SyncStatus::Cancelled
		} else if failed > 0 && synced == 0 {
			SyncStatus::Failed
		} else {
			SyncStatus::Success
		};
		let error_message = if cancelled {
			Some(MirrorError::Cancelled.to_string())
		} else {
			self.first_error()
		};
		SyncOutcome {
			status,
			providers_synced: synced as i64,
			providers_failed: failed as i64,
			error_message,
			sync_details: Some(serde_json::json!({
				"partial": synced > 0 && failed > 0,
				"artifacts": self.artifacts,
				"skipped": self.skipped,
				"errors": self.errors,
			})),
		}
	}
}

/// Snapshot returned by [`MirrorSyncEngine::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStatus {
	pub mirror_id: Uuid,
	pub name: String,
	pub enabled: bool,
	pub running: bool,
	pub last_sync_at: Option<chrono::DateTime<Utc>>,
	pub last_sync_status: Option<SyncStatus>,
	pub last_sync_error: Option<String>,
	pub history: Vec<MirrorSyncHistory>,
}

struct RunGuard<'a> {
	in_flight: &'a Mutex<HashSet<Uuid>>,
	mirror_id: Uuid,
}

impl Drop for RunGuard<'_> {
	fn drop(&mut self) {
		if let Ok(mut running) = self.in_flight.lock() {
			running.remove(&self.mirror_id);
		}
	}
}

struct Filters {
	namespaces: NameFilter,
	providers: NameFilter,
	versions: VersionFilter,
	platforms: PlatformFilter,
}

impl Filters {
	fn from_config(config: &MirrorConfig) -> Result<Self> {
		Ok(Self {
			namespaces: NameFilter::new(&config.namespace_filter)?,
			providers: NameFilter::new(&config.provider_filter)?,
			versions: VersionFilter::parse(config.version_filter.as_deref())?,
			platforms: PlatformFilter::new(&config.platform_filter)?,
		})
	}

	fn admits(&self, namespace: &str, provider: &str) -> bool {
		self.namespaces.matches(namespace) && self.providers.matches(provider)
	}
}

/// Per-version state shared by its platforms: the resolved provider version
/// row and the verified checksum document.
#[derive(Default)]
struct VersionState {
	provider_version: Option<ProviderVersion>,
	sums: HashMap<String, std::result::Result<ShaSums, String>>,
}

pub struct MirrorSyncEngine {
	mirrors: Arc<dyn MirrorStore>,
	providers: Arc<dyn ProviderStore>,
	storage: Arc<dyn Storage>,
	settings: SyncSettings,
	in_flight: Mutex<HashSet<Uuid>>,
}

impl MirrorSyncEngine {
	pub fn new(
		mirrors: Arc<dyn MirrorStore>,
		providers: Arc<dyn ProviderStore>,
		storage: Arc<dyn Storage>,
		settings: SyncSettings,
	) -> Self {
		Self {
			mirrors,
			providers,
			storage,
			settings,
			in_flight: Mutex::new(HashSet::new()),
		}
	}

	pub fn is_running(&self, mirror_id: Uuid) -> bool {
		self
			.in_flight
			.lock()
			.map(|running| running.contains(&mirror_id))
			.unwrap_or(false)
	}

	fn acquire(&self, mirror_id: Uuid) -> Result<RunGuard<'_>> {
		let mut running = self
			.in_flight
			.lock()
			.map_err(|_| MirrorError::AlreadyRunning(mirror_id))?;
		if !running.insert(mirror_id) {
			return Err(MirrorError::AlreadyRunning(mirror_id));
		}
		Ok(RunGuard {
			in_flight: &self.in_flight,
			mirror_id,
		})
	}

	pub async fn get_status(&self, mirror_id: Uuid) -> Result<MirrorStatus> {
		let config = self
			.mirrors
			.get_config(mirror_id)
			.await?
			.ok_or(MirrorError::NotFound(mirror_id))?;
		let history = self.mirrors.list_history(mirror_id, STATUS_HISTORY_LIMIT).await?;
		Ok(MirrorStatus {
			mirror_id,
			name: config.name,
			enabled: config.enabled,
			running: self.is_running(mirror_id),
			last_sync_at: config.last_sync_at,
			last_sync_status: config.last_sync_status,
			last_sync_error: config.last_sync_error,
			history,
		})
	}

	/// Run every enabled mirror whose interval has elapsed. Mirrors run one
	/// after another; a failing mirror does not stop the rest.
	#[instrument(skip(self, cancel))]
	pub async fn sync_due(&self, cancel: &CancellationToken) -> Result<Vec<SyncReport>> {
		let now = Utc::now();
		let due: Vec<MirrorConfig> = self
			.mirrors
			.list_enabled_configs()
			.await?
			.into_iter()
			.filter(|c| c.is_due(now))
			.collect();

		let mut reports = Vec::with_capacity(due.len());
		for config in due {
			if cancel.is_cancelled() {
				break;
			}
			match self.trigger_sync(config.id, SyncTarget::default(), cancel).await {
				Ok(report) => reports.push(report),
				Err(MirrorError::AlreadyRunning(id)) => debug!(mirror_id = %id, "mirror already syncing"),
				Err(e) => warn!(mirror_id = %config.id, error = %e, "mirror sync failed to start"),
			}
		}
		Ok(reports)
	}

	/// Synchronize one mirror now, optionally narrowed to a namespace and/or
	/// provider. A second concurrent run of the same mirror is rejected.
	#[instrument(skip(self, cancel), fields(mirror_id = %mirror_id))]
	pub async fn trigger_sync(
		&self,
		mirror_id: Uuid,
		target: SyncTarget,
		cancel: &CancellationToken,
	) -> Result<SyncReport> {
		let config = self
			.mirrors
			.get_config(mirror_id)
			.await?
			.ok_or(MirrorError::NotFound(mirror_id))?;
		let _guard = self.acquire(mirror_id)?;

		let filters = match Filters::from_config(&config) {
			Ok(filters) => filters,
			Err(e) => {
				warn!(error = %e, "mirror filters are invalid");
				self
					.mirrors
					.update_sync_status(mirror_id, SyncStatus::Failed, Utc::now(), Some(&e.to_string()))
					.await?;
				return Err(e);
			}
		};

		let history = MirrorSyncHistory {
			id: Uuid::new_v4(),
			mirror_config_id: mirror_id,
			started_at: Utc::now(),
			completed_at: None,
			status: SyncStatus::Running,
			providers_synced: 0,
			providers_failed: 0,
			error_message: None,
			sync_details: None,
		};
		self.mirrors.create_history(&history).await?;
		info!(mirror = %config.name, history_id = %history.id, "mirror sync started");

		let mut report = SyncReport {
			mirror_id,
			history_id: history.id,
			status: SyncStatus::Running,
			artifacts: Vec::new(),
			skipped: Vec::new(),
			errors: Vec::new(),
		};

		if let Err(e) = self.run(&config, &filters, &target, cancel, &mut report).await {
			if !matches!(e, MirrorError::Cancelled) {
				warn!(error = %e, "mirror sync aborted");
				report.errors.insert(0, e.to_string());
			}
		}

		let outcome = report.outcome(cancel.is_cancelled());
		report.status = outcome.status;
		self.mirrors.complete_history(history.id, &outcome).await?;
		self
			.mirrors
			.update_sync_status(mirror_id, outcome.status, Utc::now(), outcome.error_message.as_deref())
			.await?;

		info!(
			status = %outcome.status,
			synced = outcome.providers_synced,
			failed = outcome.providers_failed,
			"mirror sync finished"
		);
		Ok(report)
	}

	async fn run(
		&self,
		config: &MirrorConfig,
		filters: &Filters,
		target: &SyncTarget,
		cancel: &CancellationToken,
		report: &mut SyncReport,
	) -> Result<()> {
		let policies = self.mirrors.list_active_policies(config.organization_id).await?;
		let client = UpstreamClient::new(
			&config.upstream_url,
			self.settings.request_timeout,
			self.settings.download_timeout,
		)?;
		let api = client.discover().await?;

		for candidate in self.candidates(&api, filters, target).await? {
			if cancel.is_cancelled() {
				return Err(MirrorError::Cancelled);
			}
			let UpstreamProvider { namespace, name } = candidate;
			let skip = |reason: String| SkippedProvider {
				namespace: namespace.clone(),
				provider: name.clone(),
				reason,
			};

			if !filters.admits(&namespace, &name) {
				report.skipped.push(skip("outside mirror filters".into()));
				continue;
			}

			match evaluate(&policies, config, &namespace, &name) {
				PolicyDecision::Allowed => {}
				PolicyDecision::Denied(policy) => {
					info!(%namespace, provider = %name, %policy, "provider denied by policy");
					report.skipped.push(skip(MirrorError::PolicyDenied(policy).to_string()));
					continue;
				}
				PolicyDecision::RequiresApproval => {
					if let Some(reason) = self.approval_gate(config, &namespace, &name).await? {
						report.skipped.push(skip(reason));
						continue;
					}
				}
			}

			if let Err(e) = self
				.sync_provider(&api, config, filters, &namespace, &name, cancel, report)
				.await
			{
				if matches!(e, MirrorError::Cancelled) {
					return Err(e);
				}
				warn!(%namespace, provider = %name, error = %e, "provider sync failed");
				report.errors.push(format!("{namespace}/{name}: {e}"));
			}
		}
		Ok(())
	}

	/// Providers to consider, deduplicated. Literal filters are used directly;
	/// globs require listing the upstream.
	async fn candidates(&self, api: &ProvidersApi, filters: &Filters, target: &SyncTarget) -> Result<Vec<UpstreamProvider>> {
		let namespaces = match &target.namespace {
			Some(ns) => Some(vec![ns.clone()]),
			None => filters.namespaces.literals().filter(|l| !l.is_empty()),
		};
		let names = match &target.provider {
			Some(name) => Some(vec![name.clone()]),
			None => filters.providers.literals().filter(|l| !l.is_empty()),
		};

		let mut found = Vec::new();
		match (namespaces, names) {
			(Some(namespaces), Some(names)) => {
				for namespace in &namespaces {
					for name in &names {
						found.push(UpstreamProvider {
							namespace: namespace.clone(),
							name: name.clone(),
						});
					}
				}
			}
			(Some(namespaces), None) => {
				for namespace in &namespaces {
					found.extend(api.list_providers(Some(namespace)).await?);
				}
			}
			(None, names) => {
				let listed = api.list_providers(None).await?;
				found.extend(listed.into_iter().filter(|p| match &names {
					Some(names) => names.iter().any(|n| n.eq_ignore_ascii_case(&p.name)),
					None => true,
				}));
			}
		}

		let mut seen = HashSet::new();
		found.retain(|p| seen.insert((p.namespace.to_ascii_lowercase(), p.name.to_ascii_lowercase())));
		Ok(found)
	}

	/// Returns a skip reason unless an approval currently covers the provider.
	async fn approval_gate(&self, config: &MirrorConfig, namespace: &str, name: &str) -> Result<Option<String>> {
		let now = Utc::now();
		let existing = self.mirrors.find_approval(config.id, namespace, name).await?;
		match existing {
			Some(request) if approval_satisfies(&request, now, self.settings.approval_ttl) => Ok(None),
			Some(request) if request.status == ApprovalStatus::Pending => {
				Ok(Some(format!("awaiting approval (request {})", request.id)))
			}
			Some(request) if request.status == ApprovalStatus::Rejected => {
				Ok(Some(format!("approval rejected (request {})", request.id)))
			}
			_ => {
				let request = MirrorApprovalRequest {
					id: Uuid::new_v4(),
					mirror_config_id: config.id,
					organization_id: config.organization_id,
					namespace: namespace.to_string(),
					provider_name: Some(name.to_string()),
					requested_by: None,
					reason: Some(format!("mirror {} requested {namespace}/{name}", config.name)),
					status: ApprovalStatus::Pending,
					reviewed_by: None,
					reviewed_at: None,
					expires_at: None,
					created_at: now,
				};
				self.mirrors.create_approval(&request).await?;
				info!(%namespace, provider = %name, request_id = %request.id, "approval requested");
				Ok(Some(MirrorError::ApprovalRequired(format!("{namespace}/{name}")).to_string()))
			}
		}
	}

	/// Claim the local provider for this mirror, creating the provenance row
	/// on first sight.
	async fn claim_provider(&self, config: &MirrorConfig, namespace: &str, name: &str) -> Result<(Provider, MirroredProvider)> {
		let provider = self.providers.get_or_create_provider(namespace, name).await?;
		if let Some(existing) = self.mirrors.get_mirrored_provider(provider.id).await? {
			if existing.mirror_config_id != config.id {
				return Err(MirrorError::Ownership(format!("{namespace}/{name}")));
			}
			return Ok((provider, existing));
		}

		let mirrored = MirroredProvider {
			id: Uuid::new_v4(),
			mirror_config_id: config.id,
			provider_id: provider.id,
			upstream_namespace: namespace.to_string(),
			upstream_type: name.to_string(),
			last_synced_at: None,
			last_sync_version: None,
			sync_enabled: true,
			created_at: Utc::now(),
		};
		match self.mirrors.create_mirrored_provider(&mirrored).await {
			Ok(()) => Ok((provider, mirrored)),
			Err(DbError::Conflict(_)) => match self.mirrors.get_mirrored_provider(provider.id).await? {
				Some(existing) if existing.mirror_config_id == config.id => Ok((provider, existing)),
				_ => Err(MirrorError::Ownership(format!("{namespace}/{name}"))),
			},
			Err(e) => Err(e.into()),
		}
	}

	#[allow(clippy::too_many_arguments)]
	#[instrument(skip(self, api, config, filters, cancel, report), fields(namespace = %namespace, provider = %name))]
	async fn sync_provider(
		&self,
		api: &ProvidersApi,
		config: &MirrorConfig,
		filters: &Filters,
		namespace: &str,
		name: &str,
		cancel: &CancellationToken,
		report: &mut SyncReport,
	) -> Result<()> {
		let upstream_versions = api.list_versions(namespace, name).await?;
		let raw: Vec<String> = upstream_versions.iter().map(|v| v.version.clone()).collect();
		let selected = filters.versions.select(&raw);
		if selected.is_empty() {
			debug!("no upstream versions selected");
			return Ok(());
		}

		let (provider, mirrored) = self.claim_provider(config, namespace, name).await?;
		if !mirrored.sync_enabled {
			report.skipped.push(SkippedProvider {
				namespace: namespace.to_string(),
				provider: name.to_string(),
				reason: "sync disabled for provider".into(),
			});
			return Ok(());
		}

		let by_version: HashMap<&str, &UpstreamVersion> =
			upstream_versions.iter().map(|v| (v.version.as_str(), v)).collect();

		for version in &selected {
			if cancel.is_cancelled() {
				return Err(MirrorError::Cancelled);
			}
			if self.mirrors.get_mirrored_version(mirrored.id, version).await?.is_some() {
				debug!(%version, "version already mirrored");
				continue;
			}
			let Some(upstream) = by_version.get(version.as_str()) else {
				continue;
			};
			let platforms: Vec<&UpstreamPlatform> = upstream
				.platforms
				.iter()
				.filter(|p| filters.platforms.matches(&p.os, &p.arch))
				.collect();
			if platforms.is_empty() {
				debug!(%version, "no platforms selected");
				continue;
			}

			let mut state = VersionState {
				provider_version: self.providers.get_provider_version(provider.id, version).await?,
				..VersionState::default()
			};
			let mut complete = true;
			for platform in platforms {
				if cancel.is_cancelled() {
					return Err(MirrorError::Cancelled);
				}
				let result = self
					.sync_platform(api, &provider, upstream, platform, &mut state)
					.await;
				let outcome = match result {
					Ok(PlatformSync::Stored) => {
						info!(%version, os = %platform.os, arch = %platform.arch, "platform synced");
						ArtifactOutcome::Synced
					}
					Ok(PlatformSync::Present) => continue,
					Err(e) => {
						complete = false;
						warn!(%version, os = %platform.os, arch = %platform.arch, error = %e, "platform sync failed");
						ArtifactOutcome::Failed(e.to_string())
					}
				};
				report.artifacts.push(ArtifactResult {
					namespace: namespace.to_string(),
					provider: name.to_string(),
					version: version.clone(),
					os: platform.os.clone(),
					arch: platform.arch.clone(),
					outcome,
				});
			}

			if complete {
				if let Some(provider_version) = &state.provider_version {
					self.record_version(&mirrored, provider_version, version).await?;
				}
			}
		}
		Ok(())
	}

	async fn record_version(&self, mirrored: &MirroredProvider, provider_version: &ProviderVersion, version: &str) -> Result<()> {
		let now = Utc::now();
		let record = MirroredProviderVersion {
			id: Uuid::new_v4(),
			mirrored_provider_id: mirrored.id,
			provider_version_id: provider_version.id,
			upstream_version: version.to_string(),
			shasum_verified: true,
			gpg_verified: true,
			synced_at: now,
		};
		match self.mirrors.create_mirrored_version(&record).await {
			Ok(()) | Err(DbError::Conflict(_)) => {}
			Err(e) => return Err(e.into()),
		}
		self.mirrors.touch_mirrored_provider(mirrored.id, version, now).await?;
		Ok(())
	}

	async fn sync_platform(
		&self,
		api: &ProvidersApi,
		provider: &Provider,
		upstream: &UpstreamVersion,
		platform: &UpstreamPlatform,
		state: &mut VersionState,
	) -> Result<PlatformSync> {
		if let Some(existing) = &state.provider_version {
			if self
				.providers
				.get_platform(existing.id, &platform.os, &platform.arch)
				.await?
				.is_some()
			{
				return Ok(PlatformSync::Present);
			}
		}

		let package = api
			.package(
				&provider.namespace,
				&provider.name,
				&upstream.version,
				&platform.os,
				&platform.arch,
			)
			.await?;
		validate_filename(&package.filename)?;

		let sums = self.verified_sums(api, &package, state).await?;
		let expected = sums
			.get(&package.filename)
			.ok_or_else(|| MirrorError::InvalidResponse {
				operation: "shasums",
				message: format!("{} is not listed in SHA256SUMS", package.filename),
			})?
			.to_string();
		ensure_matches(&package.filename, &expected, &package.shasum)?;

		let provider_version = self.provider_version(provider, upstream, &package, state).await?;
		if self
			.providers
			.get_platform(provider_version.id, &platform.os, &platform.arch)
			.await?
			.is_some()
		{
			return Ok(PlatformSync::Present);
		}

		let scratch = match &self.settings.scratch_parent {
			Some(parent) => tempfile::Builder::new().prefix("terrace-mirror-").tempdir_in(parent)?,
			None => tempfile::Builder::new().prefix("terrace-mirror-").tempdir()?,
		};
		let local = scratch.path().join("package.zip");
		let downloaded = api.client().download_to(&package.download_url, &local).await?;
		ensure_matches(&package.filename, &expected, &downloaded.sha256)?;

		let h1 = compute_h1(&local).await?;
		let path = format!(
			"providers/{}/{}/{}/{}_{}/{}",
			provider.namespace, provider.name, upstream.version, platform.os, platform.arch, package.filename
		);
		let file = tokio::fs::File::open(&local).await?;
		let stored = self.storage.upload(&path, Box::new(file), Some(downloaded.size)).await?;
		if let Err(e) = ensure_matches(&package.filename, &expected, &stored.checksum) {
			self.discard(&path).await;
			return Err(e);
		}

		let record = ProviderPlatform {
			id: Uuid::new_v4(),
			provider_version_id: provider_version.id,
			os: platform.os.clone(),
			arch: platform.arch.clone(),
			filename: package.filename.clone(),
			storage_path: stored.path,
			storage_backend: self.storage.backend().to_string(),
			size_bytes: stored.size as i64,
			sha256: stored.checksum,
			h1_hash: Some(h1),
			created_at: Utc::now(),
		};
		match self.providers.create_platform(&record).await {
			Ok(()) => Ok(PlatformSync::Stored),
			// Same verified bytes at the same path; the other writer's row stands.
			Err(DbError::Conflict(_)) => Ok(PlatformSync::Present),
			Err(e) => {
				self.discard(&path).await;
				Err(e.into())
			}
		}
	}

	async fn provider_version(
		&self,
		provider: &Provider,
		upstream: &UpstreamVersion,
		package: &PackageInfo,
		state: &mut VersionState,
	) -> Result<ProviderVersion> {
		if let Some(existing) = &state.provider_version {
			return Ok(existing.clone());
		}
		let resolved = match self.providers.get_provider_version(provider.id, &upstream.version).await? {
			Some(existing) => existing,
			None => {
				let protocols = if package.protocols.is_empty() {
					upstream.protocols.clone()
				} else {
					package.protocols.clone()
				};
				let created = ProviderVersion {
					id: Uuid::new_v4(),
					provider_id: provider.id,
					version: upstream.version.clone(),
					protocols,
					gpg_key_id: package.key_id().map(str::to_string),
					gpg_ascii_armor: package.signing_keys.gpg_public_keys.first().map(|k| k.ascii_armor.clone()),
					shasums_url: Some(package.shasums_url.clone()),
					shasums_signature_url: Some(package.shasums_signature_url.clone()),
					created_at: Utc::now(),
				};
				match self.providers.create_provider_version(&created).await {
					Ok(()) => created,
					Err(DbError::Conflict(_)) => self
						.providers
						.get_provider_version(provider.id, &upstream.version)
						.await?
						.ok_or_else(|| DbError::Internal("provider version vanished after conflict".into()))?,
					Err(e) => return Err(e.into()),
				}
			}
		};
		state.provider_version = Some(resolved.clone());
		Ok(resolved)
	}

	/// Fetch and verify the release's `SHA256SUMS` once per version. A
	/// rejected document fails every platform that depends on it.
	async fn verified_sums(&self, api: &ProvidersApi, package: &PackageInfo, state: &mut VersionState) -> Result<ShaSums> {
		match state.sums.get(&package.shasums_url) {
			Some(Ok(sums)) => return Ok(sums.clone()),
			Some(Err(message)) => {
				return Err(MirrorError::InvalidResponse {
					operation: "shasums",
					message: format!("release checksums rejected: {message}"),
				})
			}
			None => {}
		}

		match fetch_verified_sums(api, package).await {
			Ok(sums) => {
				state.sums.insert(package.shasums_url.clone(), Ok(sums.clone()));
				Ok(sums)
			}
			Err(e) => {
				if !e.is_transient() {
					state.sums.insert(package.shasums_url.clone(), Err(e.to_string()));
				}
				Err(e)
			}
		}
	}

	async fn discard(&self, path: &str) {
		if let Err(e) = self.storage.delete(path).await {
			warn!(%path, error = %e, "failed to remove rejected upload");
		}
	}
}

enum PlatformSync {
	Stored,
	Present,
}

async fn fetch_verified_sums(api: &ProvidersApi, package: &PackageInfo) -> Result<ShaSums> {
	let document = api.client().fetch_bytes("shasums", &package.shasums_url).await?;
	let signature = api
		.client()
		.fetch_bytes("shasums_signature", &package.shasums_signature_url)
		.await?;
	verify_detached(&package.armored_keys(), &document, &signature)?;
	let text = String::from_utf8(document).map_err(|_| MirrorError::InvalidResponse {
		operation: "shasums",
		message: "SHA256SUMS is not UTF-8".into(),
	})?;
	ShaSums::parse(&text)
}

async fn compute_h1(path: &Path) -> Result<String> {
	let path = path.to_path_buf();
	tokio::task::spawn_blocking(move || h1_from_zip(std::fs::File::open(path)?))
		.await
		.map_err(|e| MirrorError::Io(std::io::Error::other(e)))?
}

fn validate_filename(filename: &str) -> Result<()> {
	if filename.is_empty() || filename.contains(['/', '\\']) || filename == "." || filename == ".." {
		return Err(MirrorError::InvalidResponse {
			operation: "package",
			message: format!("unsafe package filename {filename:?}"),
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::checksum::sha256_hex;
	use serde_json::json;
	use terrace_server_db::testing::{create_test_pool, make_mirror_config};
	use terrace_server_db::{MirrorPolicy, MirrorRepository, PolicyType, RegistryRepository};
	use terrace_server_storage::LocalStorage;
	use tempfile::TempDir;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	const KEY: &str = include_str!("../tests/fixtures/signing_key.asc");
	const OTHER_KEY: &str = include_str!("../tests/fixtures/other_key.asc");
	const SUMS: &[u8] = include_bytes!("../tests/fixtures/widget_1.0.0_SHA256SUMS");
	const SIG: &[u8] = include_bytes!("../tests/fixtures/widget_1.0.0_SHA256SUMS.sig");
	const DARWIN_ARM64: &[u8] = include_bytes!("../tests/fixtures/terraform-provider-widget_1.0.0_darwin_arm64.zip");
	const LINUX_AMD64: &[u8] = include_bytes!("../tests/fixtures/terraform-provider-widget_1.0.0_linux_amd64.zip");
	const WINDOWS_AMD64: &[u8] = include_bytes!("../tests/fixtures/terraform-provider-widget_1.0.0_windows_amd64.zip");
	const LINUX_H1: &str = "h1:git0lUTh62O3MyhL2L+HsgwMzsVsEUlHNPzO+gEyA3E=";

	const PLATFORMS: [(&str, &str, &[u8]); 3] = [
		("darwin", "arm64", DARWIN_ARM64),
		("linux", "amd64", LINUX_AMD64),
		("windows", "amd64", WINDOWS_AMD64),
	];

	fn filename(os: &str, arch: &str) -> String {
		format!("terraform-provider-widget_1.0.0_{os}_{arch}.zip")
	}

	/// Upstream registry serving acme/widget 1.0.0 for three platforms.
	/// `tampered` swaps the served binary of one platform for other bytes.
	async fn mount_upstream(server: &MockServer, key: &str, tampered: Option<(&str, &str)>) {
		Mock::given(method("GET"))
			.and(path("/.well-known/terraform.json"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "providers.v1": "/v1/providers/" })))
			.mount(server)
			.await;
		Mock::given(method("GET"))
			.and(path("/v1/providers/acme/widget/versions"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"versions": [
					{
						"version": "1.0.0",
						"protocols": ["5.0"],
						"platforms": PLATFORMS.iter().map(|(os, arch, _)| json!({ "os": os, "arch": arch })).collect::<Vec<_>>()
					},
					{ "version": "0.9.0", "protocols": ["5.0"], "platforms": [] }
				]
			})))
			.mount(server)
			.await;
		Mock::given(method("GET"))
			.and(path("/files/SHA256SUMS"))
			.respond_with(ResponseTemplate::new(200).set_body_bytes(SUMS.to_vec()))
			.mount(server)
			.await;
		Mock::given(method("GET"))
			.and(path("/files/SHA256SUMS.sig"))
			.respond_with(ResponseTemplate::new(200).set_body_bytes(SIG.to_vec()))
			.mount(server)
			.await;

		for (os, arch, bytes) in PLATFORMS {
			let name = filename(os, arch);
			Mock::given(method("GET"))
				.and(path(format!("/v1/providers/acme/widget/1.0.0/download/{os}/{arch}")))
				.respond_with(ResponseTemplate::new(200).set_body_json(json!({
					"protocols": ["5.0"],
					"os": os,
					"arch": arch,
					"filename": name,
					"download_url": format!("/files/{name}"),
					"shasums_url": "/files/SHA256SUMS",
					"shasums_signature_url": "/files/SHA256SUMS.sig",
					"shasum": sha256_hex(bytes),
					"signing_keys": { "gpg_public_keys": [{ "key_id": "D9F763BDE20DC6C5", "ascii_armor": key }] }
				})))
				.mount(server)
				.await;

			let served = if tampered == Some((os, arch)) {
				b"not the signed binary".to_vec()
			} else {
				bytes.to_vec()
			};
			Mock::given(method("GET"))
				.and(path(format!("/files/{name}")))
				.respond_with(ResponseTemplate::new(200).set_body_bytes(served))
				.mount(server)
				.await;
		}
	}

	struct Harness {
		engine: MirrorSyncEngine,
		mirrors: Arc<MirrorRepository>,
		registry: Arc<RegistryRepository>,
		storage: Arc<LocalStorage>,
		config: MirrorConfig,
		_root: TempDir,
	}

	async fn harness(server: &MockServer, configure: impl FnOnce(&mut MirrorConfig)) -> Harness {
		let pool = create_test_pool().await;
		let mirrors = Arc::new(MirrorRepository::new(pool.clone()));
		let registry = Arc::new(RegistryRepository::new(pool));
		let root = TempDir::new().unwrap();
		let storage = Arc::new(LocalStorage::new(root.path().join("artifacts")));

		let mut config = make_mirror_config("public");
		config.upstream_url = server.uri();
		config.namespace_filter = vec!["acme".into()];
		config.provider_filter = vec!["widget".into()];
		configure(&mut config);
		mirrors.create_config(&config).await.unwrap();

		let settings = SyncSettings {
			request_timeout: Duration::from_secs(5),
			download_timeout: Duration::from_secs(5),
			scratch_parent: Some(root.path().to_path_buf()),
			..SyncSettings::default()
		};
		let engine = MirrorSyncEngine::new(mirrors.clone(), registry.clone(), storage.clone(), settings);
		Harness {
			engine,
			mirrors,
			registry,
			storage,
			config,
			_root: root,
		}
	}

	impl Harness {
		async fn sync(&self) -> SyncReport {
			self
				.engine
				.trigger_sync(self.config.id, SyncTarget::default(), &CancellationToken::new())
				.await
				.unwrap()
		}

		async fn platforms(&self) -> Vec<ProviderPlatform> {
			let provider = self.registry.get_or_create_provider("acme", "widget").await.unwrap();
			match self.registry.get_provider_version(provider.id, "1.0.0").await.unwrap() {
				Some(version) => self.registry.list_platforms(version.id).await.unwrap(),
				None => Vec::new(),
			}
		}

		async fn mirrored_version(&self) -> Option<MirroredProviderVersion> {
			let provider = self.registry.get_or_create_provider("acme", "widget").await.unwrap();
			let mirrored = self.mirrors.get_mirrored_provider(provider.id).await.unwrap()?;
			self.mirrors.get_mirrored_version(mirrored.id, "1.0.0").await.unwrap()
		}
	}

	#[tokio::test]
	async fn test_sync_copies_verified_platforms() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;

		let report = h.sync().await;
		assert_eq!(report.status, SyncStatus::Success);
		assert_eq!(report.synced(), 3);
		assert_eq!(report.failed(), 0);

		let platforms = h.platforms().await;
		assert_eq!(platforms.len(), 3);
		let linux = platforms.iter().find(|p| p.os == "linux").unwrap();
		assert_eq!(linux.sha256, sha256_hex(LINUX_AMD64));
		assert_eq!(linux.h1_hash.as_deref(), Some(LINUX_H1));
		assert_eq!(
			linux.storage_path,
			"providers/acme/widget/1.0.0/linux_amd64/terraform-provider-widget_1.0.0_linux_amd64.zip"
		);
		assert!(h.storage.exists(&linux.storage_path).await.unwrap());

		let mirrored = h.mirrored_version().await.unwrap();
		assert!(mirrored.shasum_verified && mirrored.gpg_verified);

		let status = h.engine.get_status(h.config.id).await.unwrap();
		assert_eq!(status.last_sync_status, Some(SyncStatus::Success));
		assert!(!status.running);
		assert_eq!(status.history.len(), 1);
		assert_eq!(status.history[0].providers_synced, 3);
	}

	#[tokio::test]
	async fn test_synced_versions_are_not_rewritten() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;

		h.sync().await;
		let before = h.platforms().await;
		let again = h.sync().await;

		assert_eq!(again.status, SyncStatus::Success);
		assert!(again.artifacts.is_empty());
		let after = h.platforms().await;
		let ids = |v: &[ProviderPlatform]| {
			let mut ids: Vec<Uuid> = v.iter().map(|p| p.id).collect();
			ids.sort();
			ids
		};
		assert_eq!(ids(&before), ids(&after));
	}

	#[tokio::test]
	async fn test_checksum_failure_is_isolated() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, Some(("linux", "amd64"))).await;
		let h = harness(&server, |_| {}).await;

		let report = h.sync().await;
		assert_eq!(report.status, SyncStatus::Success);
		assert_eq!(report.synced(), 2);
		assert_eq!(report.failed(), 1);
		let failed = report
			.artifacts
			.iter()
			.find(|a| matches!(a.outcome, ArtifactOutcome::Failed(_)))
			.unwrap();
		assert_eq!((failed.os.as_str(), failed.arch.as_str()), ("linux", "amd64"));

		let mut oses: Vec<String> = h.platforms().await.into_iter().map(|p| p.os).collect();
		oses.sort();
		assert_eq!(oses, vec!["darwin", "windows"]);
		assert!(h.mirrored_version().await.is_none());

		let history = h.mirrors.list_history(h.config.id, 1).await.unwrap();
		assert_eq!(history[0].status, SyncStatus::Success);
		assert_eq!(history[0].providers_failed, 1);
		assert!(history[0].error_message.as_deref().unwrap().contains("checksum mismatch"));
		assert_eq!(history[0].sync_details.as_ref().unwrap()["partial"], json!(true));

		server.reset().await;
		mount_upstream(&server, KEY, None).await;
		let retry = h.sync().await;
		assert_eq!(retry.synced(), 1);
		assert_eq!(retry.artifacts[0].os, "linux");
		assert_eq!(h.platforms().await.len(), 3);
		assert!(h.mirrored_version().await.is_some());
	}

	#[tokio::test]
	async fn test_untrusted_signature_fails_every_platform() {
		let server = MockServer::start().await;
		mount_upstream(&server, OTHER_KEY, None).await;
		let h = harness(&server, |_| {}).await;

		let report = h.sync().await;
		assert_eq!(report.status, SyncStatus::Failed);
		assert_eq!(report.synced(), 0);
		assert_eq!(report.failed(), 3);
		assert!(h.platforms().await.is_empty());

		let config = h.mirrors.get_config(h.config.id).await.unwrap().unwrap();
		assert_eq!(config.last_sync_status, Some(SyncStatus::Failed));
		assert!(config
			.last_sync_error
			.unwrap()
			.contains("signature verification failed"));
	}

	fn policy(kind: PolicyType, namespace: &str, priority: i64, requires_approval: bool) -> MirrorPolicy {
		MirrorPolicy {
			id: Uuid::new_v4(),
			organization_id: None,
			name: format!("{namespace}-{}", kind.as_str()),
			policy_type: kind,
			upstream_pattern: None,
			namespace_pattern: Some(namespace.to_string()),
			provider_pattern: None,
			priority,
			is_active: true,
			requires_approval,
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_denied_provider_is_skipped() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;
		h.mirrors.create_policy(&policy(PolicyType::Deny, "acme", 10, false)).await.unwrap();

		let report = h.sync().await;
		assert_eq!(report.status, SyncStatus::Success);
		assert!(report.artifacts.is_empty());
		assert_eq!(report.skipped.len(), 1);
		assert!(report.skipped[0].reason.contains("denied"));
		assert!(h.platforms().await.is_empty());
	}

	#[tokio::test]
	async fn test_approval_gates_sync() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;
		h.mirrors.create_policy(&policy(PolicyType::Allow, "*", 0, true)).await.unwrap();

		let first = h.sync().await;
		assert!(first.artifacts.is_empty());
		assert_eq!(first.skipped.len(), 1);
		let request = h
			.mirrors
			.find_approval(h.config.id, "acme", "widget")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(request.status, ApprovalStatus::Pending);

		let second = h.sync().await;
		assert!(second.skipped[0].reason.contains("awaiting approval"));

		h.mirrors
			.review_approval(request.id, ApprovalStatus::Approved, None)
			.await
			.unwrap();
		let third = h.sync().await;
		assert_eq!(third.synced(), 3);
	}

	#[tokio::test]
	async fn test_glob_filters_list_upstream() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		Mock::given(method("GET"))
			.and(path("/v1/providers/acme"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"meta": { "next_url": null },
				"providers": [
					{ "namespace": "acme", "name": "widget" },
					{ "namespace": "acme", "name": "gadget" }
				]
			})))
			.mount(&server)
			.await;
		let h = harness(&server, |c| {
			c.provider_filter = vec!["wid*".into()];
			c.platform_filter = vec!["linux/*".into()];
			c.version_filter = Some("latest:1".into());
		})
		.await;

		let report = h.sync().await;
		assert_eq!(report.synced(), 1);
		assert_eq!(report.artifacts[0].os, "linux");
		assert!(report.skipped.iter().any(|s| s.provider == "gadget"));
	}

	#[tokio::test]
	async fn test_concurrent_run_rejected() {
		let server = MockServer::start().await;
		let h = harness(&server, |_| {}).await;

		let _held = h.engine.acquire(h.config.id).unwrap();
		assert!(h.engine.is_running(h.config.id));
		let result = h
			.engine
			.trigger_sync(h.config.id, SyncTarget::default(), &CancellationToken::new())
			.await;
		assert!(matches!(result, Err(MirrorError::AlreadyRunning(id)) if id == h.config.id));
	}

	#[tokio::test]
	async fn test_cancelled_run_is_recorded() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;

		let cancel = CancellationToken::new();
		cancel.cancel();
		let report = h
			.engine
			.trigger_sync(h.config.id, SyncTarget::default(), &cancel)
			.await
			.unwrap();

		assert_eq!(report.status, SyncStatus::Cancelled);
		let status = h.engine.get_status(h.config.id).await.unwrap();
		assert_eq!(status.last_sync_status, Some(SyncStatus::Cancelled));
		assert_eq!(status.history[0].status, SyncStatus::Cancelled);
		assert!(!status.running);
	}

	#[tokio::test]
	async fn test_invalid_filter_rejected_before_history() {
		let server = MockServer::start().await;
		let h = harness(&server, |c| c.version_filter = Some("latest:0".into())).await;

		let result = h
			.engine
			.trigger_sync(h.config.id, SyncTarget::default(), &CancellationToken::new())
			.await;
		assert!(matches!(result, Err(MirrorError::InvalidFilter { .. })));

		let status = h.engine.get_status(h.config.id).await.unwrap();
		assert!(status.history.is_empty());
		assert_eq!(status.last_sync_status, Some(SyncStatus::Failed));
		assert!(status.last_sync_error.unwrap().contains("latest:0"));
		assert!(!status.running);
	}

	#[tokio::test]
	async fn test_unknown_mirror() {
		let server = MockServer::start().await;
		let h = harness(&server, |_| {}).await;
		let missing = Uuid::new_v4();

		assert!(matches!(
			h.engine
				.trigger_sync(missing, SyncTarget::default(), &CancellationToken::new())
				.await,
			Err(MirrorError::NotFound(id)) if id == missing
		));
		assert!(matches!(h.engine.get_status(missing).await, Err(MirrorError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_sync_due_skips_recent_mirrors() {
		let server = MockServer::start().await;
		mount_upstream(&server, KEY, None).await;
		let h = harness(&server, |_| {}).await;

		let reports = h.engine.sync_due(&CancellationToken::new()).await.unwrap();
		assert_eq!(reports.len(), 1);
		let reports = h.engine.sync_due(&CancellationToken::new()).await.unwrap();
		assert!(reports.is_empty());
	}

	#[test]
	fn test_sync_target_normalizes() {
		let target = SyncTarget::new(Some(" HashiCorp ".into()), Some(String::new()));
		assert_eq!(target.namespace.as_deref(), Some("hashicorp"));
		assert_eq!(target.provider, None);
	}
}
