// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns a verified tag push into an immutable module version.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use terrace_common_secret::SecretString;
use terrace_server_db::{
	DbError, DeliveryState, Module, ModuleStore, ModuleVersion, RepositoryLink, RepositoryLinkStore, WebhookLogStore,
};
use terrace_server_scm::{ArchiveFormat, IncomingHook, ScmConnector, ScmError};
use terrace_server_storage::{ByteReader, Storage, StoredObject};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::archive::{extract_archive, locate_module_root, repackage, validate_module, PackagedArchive};
use crate::context::IngestionContext;
use crate::error::{PublishError, Result};
use crate::scratch::ScratchDir;
use crate::version::extract_version;

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Deterministic, version-qualified object path for one delivery's archive.
pub fn module_storage_path(module: &Module, version: &str, log_id: Uuid) -> String {
	format!(
		"modules/{}/{}/{}/{}/{}.tar.gz",
		module.namespace, module.name, module.system, version, log_id
	)
}

pub struct Publisher {
	modules: Arc<dyn ModuleStore>,
	links: Arc<dyn RepositoryLinkStore>,
	logs: Arc<dyn WebhookLogStore>,
	storage: Arc<dyn Storage>,
	scratch_parent: Option<PathBuf>,
	download_timeout: Duration,
}

impl Publisher {
	pub fn new(ctx: &IngestionContext) -> Self {
		Self {
			modules: ctx.modules.clone(),
			links: ctx.links.clone(),
			logs: ctx.logs.clone(),
			storage: ctx.storage.clone(),
			scratch_parent: None,
			download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
		}
	}

	pub fn with_scratch_parent(mut self, parent: Option<PathBuf>) -> Self {
		self.scratch_parent = parent;
		self
	}

	pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
		self.download_timeout = timeout;
		self
	}

	/// Publish the tag named by `hook`, recording the outcome on `log_id`.
	///
	/// The log moves to `processing` first and ends `completed` with the new
	/// version id, or `failed` with the error text.
	#[instrument(skip(self, connector, token, link, hook), fields(link_id = %link.id, log_id = %log_id, tag = ?hook.tag_name))]
	pub async fn publish(
		&self,
		connector: &dyn ScmConnector,
		token: &SecretString,
		link: &RepositoryLink,
		hook: &IncomingHook,
		log_id: Uuid,
	) -> Result<ModuleVersion> {
		self
			.logs
			.update_state(log_id, DeliveryState::Processing, None, None)
			.await?;
		info!(state = %DeliveryState::Processing, "publish started");

		match self.run(connector, token, link, hook, log_id).await {
			Ok(version) => {
				self.finish(log_id, DeliveryState::Completed, Some(version.id), None).await;
				info!(version = %version.version, version_id = %version.id, "module version published");
				Ok(version)
			}
			Err(e) => {
				let message = e.to_string();
				self.finish(log_id, DeliveryState::Failed, None, Some(&message)).await;
				warn!(error = %message, conflict = e.is_conflict(), "publish failed");
				Err(e)
			}
		}
	}

	async fn finish(&self, log_id: Uuid, state: DeliveryState, version_id: Option<Uuid>, error: Option<&str>) {
		if let Err(e) = self.logs.update_state(log_id, state, version_id, error).await {
			warn!(error = %e, state = %state, "failed to record publish outcome");
		}
	}

	async fn run(
		&self,
		connector: &dyn ScmConnector,
		token: &SecretString,
		link: &RepositoryLink,
		hook: &IncomingHook,
		log_id: Uuid,
	) -> Result<ModuleVersion> {
		let tag = hook
			.tag_name
			.as_deref()
			.ok_or_else(|| PublishError::VersionExtraction { tag: String::new() })?;
		let version = extract_version(&link.tag_pattern, tag)?;
		let pushed = hook
			.commit_sha
			.as_deref()
			.ok_or_else(|| PublishError::InvalidArchive(format!("tag {tag} has no commit")))?;
		let commit = self.peel_tag(connector, token, link, tag, pushed).await?;

		let module = self
			.modules
			.get_module(link.module_id)
			.await?
			.ok_or_else(|| PublishError::NotFound(format!("module {}", link.module_id)))?;

		if self.modules.get_version(module.id, &version).await?.is_some() {
			return Err(PublishError::Conflict { version });
		}

		let scratch = ScratchDir::create(self.scratch_parent.as_deref())?;
		let format = connector.preferred_archive_format();
		let download = scratch.join(&format!("source.{}", format.extension()));
		self
			.download(connector, token, link, &commit, format, &download)
			.await?;

		let published_at = Utc::now().trunc_subsecs(0);
		let packaged = build_package(
			download,
			format,
			scratch.subdir("source")?,
			link.module_path.clone(),
			commit.clone(),
			published_at,
			scratch.join("module.tar.gz"),
		)
		.await?;

		let path = module_storage_path(&module, &version, log_id);
		let stored = self.upload(&path, &packaged).await?;

		let record = ModuleVersion {
			id: Uuid::new_v4(),
			module_id: module.id,
			version: version.clone(),
			storage_path: stored.path.clone(),
			storage_backend: self.storage.backend().to_string(),
			size_bytes: stored.size as i64,
			checksum: stored.checksum.clone(),
			source_tag: Some(tag.to_string()),
			source_commit: Some(commit.clone()),
			link_id: Some(link.id),
			published_at,
		};

		if let Err(e) = self.modules.create_version(&record).await {
			self.discard(&stored.path).await;
			return Err(match e {
				DbError::Conflict(_) => PublishError::Conflict { version },
				other => other.into(),
			});
		}

		if let Err(e) = self.links.update_link_last_synced(link.id, &commit, published_at).await {
			warn!(error = %e, "failed to record last synced commit");
		}

		Ok(record)
	}

	/// Resolve the tag to the commit it points at. Push payloads may carry an
	/// annotated tag object instead of a commit.
	async fn peel_tag(
		&self,
		connector: &dyn ScmConnector,
		token: &SecretString,
		link: &RepositoryLink,
		tag: &str,
		pushed: &str,
	) -> Result<String> {
		let resolved = match connector
			.fetch_tag_by_name(token, &link.owner, &link.repo_name, tag)
			.await
		{
			Ok(resolved) => resolved,
			Err(ScmError::NotFound(_)) => {
				return Err(PublishError::NotFound(format!("tag {tag} no longer exists")));
			}
			Err(e) => return Err(e.into()),
		};
		if resolved.commit_sha != pushed {
			debug!(pushed = %pushed, commit = %resolved.commit_sha, "peeled tag to commit");
		}
		Ok(resolved.commit_sha)
	}

	async fn download(
		&self,
		connector: &dyn ScmConnector,
		token: &SecretString,
		link: &RepositoryLink,
		commit: &str,
		format: ArchiveFormat,
		dest: &Path,
	) -> Result<u64> {
		let fetch = async {
			let stream = connector
				.download_source_archive(token, &link.owner, &link.repo_name, commit, format)
				.await?;
			let mut reader = StreamReader::new(stream);
			let mut file = tokio::fs::File::create(dest).await?;
			let bytes = tokio::io::copy(&mut reader, &mut file).await?;
			tokio::io::AsyncWriteExt::flush(&mut file).await?;
			Ok::<_, PublishError>(bytes)
		};

		let bytes = tokio::time::timeout(self.download_timeout, fetch)
			.await
			.map_err(|_| PublishError::Timeout("source archive download"))??;
		info!(bytes, commit = %commit, "downloaded source archive");
		Ok(bytes)
	}

	async fn upload(&self, path: &str, packaged: &PackagedArchive) -> Result<StoredObject> {
		let file = tokio::fs::File::open(&packaged.path).await?;
		let body: ByteReader = Box::new(file);
		let stored = self.storage.upload(path, body, Some(packaged.size)).await?;

		if stored.checksum != packaged.checksum {
			self.discard(&stored.path).await;
			return Err(PublishError::InvalidArchive(format!(
				"stored checksum {} does not match packaged checksum {}",
				stored.checksum, packaged.checksum
			)));
		}
		Ok(stored)
	}

	async fn discard(&self, path: &str) {
		match self.storage.delete(path).await {
			Ok(()) => info!(path = %path, "removed uploaded archive after failed publish"),
			Err(e) => warn!(path = %path, error = %e, "failed to remove uploaded archive"),
		}
	}
}

/// Extract, validate and repackage on the blocking pool.
async fn build_package(
	archive: PathBuf,
	format: ArchiveFormat,
	extract_to: PathBuf,
	module_path: String,
	commit: String,
	published_at: DateTime<Utc>,
	out: PathBuf,
) -> Result<PackagedArchive> {
	tokio::task::spawn_blocking(move || {
		extract_archive(&archive, format, &extract_to)?;
		let root = locate_module_root(&extract_to, &module_path)?;
		validate_module(&root)?;
		repackage(&root, &commit, published_at, &out)
	})
	.await
	.map_err(|e| PublishError::Io(std::io::Error::other(e.to_string())))?
}
