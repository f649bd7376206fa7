// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Detects source tags that were moved after a module version was published
//! from them.
//!
//! Every version carrying a source tag and commit is re-resolved through its
//! link's connector. A tag now pointing elsewhere raises an unresolved
//! [`ImmutabilityViolation`]; the version itself is never touched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use terrace_common_secret::SecretString;
use terrace_server_db::{
	ImmutabilityViolation, ImmutabilityViolationStore, ModuleStore, ModuleVersion, RepositoryLink,
};
use terrace_server_jobs::{Job, JobContext, JobError, JobOutput};
use terrace_server_publish::{IngestionContext, PublishError};
use terrace_server_scm::{ScmConnector, ScmError};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub struct TagImmutabilityJob {
	ctx: IngestionContext,
	violations: Arc<dyn ImmutabilityViolationStore>,
}

/// Connector and credentials for one link, opened once per run.
struct LinkSession {
	link: RepositoryLink,
	connector: Arc<dyn ScmConnector>,
	token: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TagCheck {
	Unchanged,
	Moved,
	AlreadyFlagged,
	TagMissing,
}

#[derive(Debug, Default)]
struct Tally {
	checked: usize,
	moved: usize,
	already_flagged: usize,
	missing: usize,
	errors: usize,
}

impl TagImmutabilityJob {
	pub fn new(ctx: IngestionContext, violations: Arc<dyn ImmutabilityViolationStore>) -> Self {
		Self { ctx, violations }
	}

	async fn open_session(&self, link_id: Uuid) -> Result<LinkSession, PublishError> {
		let link = self.ctx.link(link_id).await?;
		let provider = self.ctx.provider(link.provider_id).await?;
		let connector = self.ctx.connector_for(&provider)?;
		let token = self.ctx.access_token_for(&link, &provider, connector.as_ref()).await?;
		Ok(LinkSession { link, connector, token })
	}

	async fn check_version(
		&self,
		session: &LinkSession,
		version: &ModuleVersion,
		tag: &str,
		original: &str,
	) -> Result<TagCheck, PublishError> {
		let link = &session.link;
		let resolved = match session
			.connector
			.fetch_tag_by_name(&session.token, &link.owner, &link.repo_name, tag)
			.await
		{
			Ok(resolved) => resolved,
			Err(ScmError::NotFound(_)) => return Ok(TagCheck::TagMissing),
			Err(e) => return Err(e.into()),
		};

		if resolved.commit_sha.eq_ignore_ascii_case(original) {
			return Ok(TagCheck::Unchanged);
		}
		if self
			.violations
			.exists_unresolved(version.id, &resolved.commit_sha)
			.await?
		{
			return Ok(TagCheck::AlreadyFlagged);
		}

		let violation = ImmutabilityViolation {
			id: Uuid::new_v4(),
			module_version_id: version.id,
			tag_name: tag.to_string(),
			original_commit: original.to_string(),
			observed_commit: resolved.commit_sha,
			detected_at: Utc::now(),
			resolved: false,
			resolved_at: None,
			resolved_by: None,
			notes: None,
		};
		self.violations.create_violation(&violation).await?;
		warn!(
			version_id = %version.id,
			version = %version.version,
			tag = %tag,
			original_commit = %violation.original_commit,
			observed_commit = %violation.observed_commit,
			"source tag moved after publish"
		);
		Ok(TagCheck::Moved)
	}
}

#[async_trait]
impl Job for TagImmutabilityJob {
	fn id(&self) -> &str {
		"tag-immutability-check"
	}

	fn name(&self) -> &str {
		"Tag Immutability Check"
	}

	fn description(&self) -> &str {
		"Flags published module versions whose source tag now points at a different commit"
	}

	#[instrument(skip(self, ctx), fields(job_id = "tag-immutability-check", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let versions = self
			.ctx
			.modules
			.list_versions_with_source()
			.await
			.map_err(|e| JobError::retryable(format!("failed to list published versions: {e}")))?;

		let mut sessions: HashMap<Uuid, Result<LinkSession, String>> = HashMap::new();
		let mut tally = Tally::default();

		for version in &versions {
			ctx.check_cancelled()?;

			let (Some(link_id), Some(tag), Some(original)) = (
				version.link_id,
				version.source_tag.as_deref(),
				version.source_commit.as_deref(),
			) else {
				continue;
			};

			if !sessions.contains_key(&link_id) {
				let opened = self.open_session(link_id).await.map_err(|e| {
					warn!(link_id = %link_id, error = %e, "cannot re-resolve tags for link");
					e.to_string()
				});
				sessions.insert(link_id, opened);
			}
			let Some(Ok(session)) = sessions.get(&link_id) else {
				tally.errors += 1;
				continue;
			};

			match self.check_version(session, version, tag, original).await {
				Ok(outcome) => {
					tally.checked += 1;
					match outcome {
						TagCheck::Unchanged => {}
						TagCheck::Moved => tally.moved += 1,
						TagCheck::AlreadyFlagged => tally.already_flagged += 1,
						TagCheck::TagMissing => {
							debug!(version_id = %version.id, tag = %tag, "source tag no longer exists");
							tally.missing += 1;
						}
					}
				}
				Err(e) => {
					warn!(version_id = %version.id, tag = %tag, error = %e, "tag re-resolution failed");
					tally.errors += 1;
				}
			}
		}

		if tally.checked == 0 && tally.errors > 0 {
			return Err(JobError::retryable(format!(
				"could not re-resolve any of {} source tags",
				tally.errors
			)));
		}

		tracing::info!(
			checked = tally.checked,
			moved = tally.moved,
			errors = tally.errors,
			"tag immutability check completed"
		);
		Ok(JobOutput {
			message: format!(
				"Checked {} tag(s), {} newly moved",
				tally.checked, tally.moved
			),
			metadata: Some(serde_json::json!({
				"checked": tally.checked,
				"violations_created": tally.moved,
				"already_flagged": tally.already_flagged,
				"tags_missing": tally.missing,
				"errors": tally.errors,
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use terrace_server_crypto::CredentialCipher;
	use terrace_server_db::testing::{create_test_pool, seed_link};
	use terrace_server_db::{
		DeliveryRepository, OAuthTokenRecord, OAuthTokenStore, RegistryRepository, ScmKind, ScmRepository,
		TriggerSource,
	};
	use terrace_server_jobs::CancellationToken;
	use terrace_server_scm::testing::MockConnector;
	use terrace_server_scm::{ConnectorDefaults, ConnectorFactory, ConnectorRegistry, ConnectorSettings};
	use terrace_server_storage::LocalStorage;

	const PUBLISHED_COMMIT: &str = "9fceb02d0ae598e95dc970b74767f19372d61af8";
	const MOVED_COMMIT: &str = "1111111111111111111111111111111111111111";

	struct Harness {
		job: TagImmutabilityJob,
		mock: Arc<MockConnector>,
		deliveries: Arc<DeliveryRepository>,
		version: ModuleVersion,
		_storage: tempfile::TempDir,
	}

	async fn harness(with_token: bool) -> Harness {
		let pool = create_test_pool().await;
		let storage = tempfile::tempdir().unwrap();
		let scm = Arc::new(ScmRepository::new(pool.clone()));
		let registry = Arc::new(RegistryRepository::new(pool.clone()));
		let deliveries = Arc::new(DeliveryRepository::new(pool.clone()));

		let mock = Arc::new(MockConnector::new(ScmKind::GitHub).with_tag("v1.0.0", PUBLISHED_COMMIT));
		let shared = mock.clone();
		let build: ConnectorFactory = Arc::new(
			move |_settings: ConnectorSettings| -> terrace_server_scm::Result<Arc<dyn ScmConnector>> {
				Ok(shared.clone() as Arc<dyn ScmConnector>)
			},
		);
		let mut connectors = ConnectorRegistry::new(ConnectorDefaults::default());
		connectors.register(ScmKind::GitHub, build);

		let ctx = IngestionContext {
			cipher: Arc::new(CredentialCipher::new(&[3u8; 32]).unwrap()),
			connectors: Arc::new(connectors),
			providers: scm.clone(),
			tokens: scm.clone(),
			links: scm.clone(),
			logs: deliveries.clone(),
			modules: registry.clone(),
			storage: Arc::new(LocalStorage::new(storage.path())),
		};

		let (module, provider, link) = seed_link(&pool).await;
		if with_token {
			let now = Utc::now();
			scm.upsert_token(&OAuthTokenRecord {
				id: Uuid::new_v4(),
				user_id: Uuid::new_v4(),
				provider_id: provider.id,
				access_token_sealed: ctx.cipher.seal_str("gho_monitor").unwrap(),
				refresh_token_sealed: None,
				token_type: "bearer".to_string(),
				scopes: vec!["repo".to_string()],
				expires_at: None,
				created_at: now,
				updated_at: now,
			})
			.await
			.unwrap();
		}

		let version = ModuleVersion {
			id: Uuid::new_v4(),
			module_id: module.id,
			version: "1.0.0".to_string(),
			storage_path: "modules/acme/vpc/aws/1.0.0/x.tar.gz".to_string(),
			storage_backend: "local".to_string(),
			size_bytes: 10,
			checksum: "00".repeat(32),
			source_tag: Some("v1.0.0".to_string()),
			source_commit: Some(PUBLISHED_COMMIT.to_string()),
			link_id: Some(link.id),
			published_at: Utc::now() - chrono::Duration::days(1),
		};
		registry.create_version(&version).await.unwrap();

		Harness {
			job: TagImmutabilityJob::new(ctx, deliveries.clone()),
			mock,
			deliveries,
			version,
			_storage: storage,
		}
	}

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Manual,
			cancellation_token: CancellationToken::new(),
		}
	}

	#[tokio::test]
	async fn test_unchanged_tag_creates_nothing() {
		let h = harness(true).await;
		let output = h.job.run(&ctx()).await.unwrap();
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["checked"], 1);
		assert_eq!(metadata["violations_created"], 0);
		assert!(h.deliveries.list_unresolved().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_moved_tag_is_flagged_once() {
		let h = harness(true).await;
		h.mock.set_tag("v1.0.0", MOVED_COMMIT);

		let first = h.job.run(&ctx()).await.unwrap().metadata.unwrap();
		assert_eq!(first["violations_created"], 1);

		let violations = h.deliveries.list_unresolved().await.unwrap();
		assert_eq!(violations.len(), 1);
		assert_eq!(violations[0].module_version_id, h.version.id);
		assert_eq!(violations[0].original_commit, PUBLISHED_COMMIT);
		assert_eq!(violations[0].observed_commit, MOVED_COMMIT);

		let second = h.job.run(&ctx()).await.unwrap().metadata.unwrap();
		assert_eq!(second["violations_created"], 0);
		assert_eq!(second["already_flagged"], 1);
		assert_eq!(h.deliveries.list_unresolved().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_deleted_tag_is_not_a_violation() {
		let h = harness(true).await;
		h.mock.tags.lock().unwrap().clear();

		let metadata = h.job.run(&ctx()).await.unwrap().metadata.unwrap();
		assert_eq!(metadata["tags_missing"], 1);
		assert!(h.deliveries.list_unresolved().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_missing_credentials_fail_retryably() {
		let h = harness(false).await;
		let err = h.job.run(&ctx()).await.unwrap_err();
		assert!(matches!(err, JobError::Failed { retryable: true, .. }));
	}

	#[tokio::test]
	async fn test_cancelled_run() {
		let h = harness(true).await;
		let ctx = ctx();
		ctx.cancellation_token.cancel();
		assert!(matches!(h.job.run(&ctx).await, Err(JobError::Cancelled)));
	}
}
