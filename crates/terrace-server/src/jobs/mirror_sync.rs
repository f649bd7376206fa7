// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic sync of every mirror whose interval has elapsed.

use std::sync::Arc;

use async_trait::async_trait;
use terrace_server_jobs::{Job, JobContext, JobError, JobOutput};
use terrace_server_mirror::MirrorSyncEngine;
use tracing::instrument;

pub struct MirrorSyncJob {
	engine: Arc<MirrorSyncEngine>,
}

impl MirrorSyncJob {
	pub fn new(engine: Arc<MirrorSyncEngine>) -> Self {
		Self { engine }
	}
}

#[async_trait]
impl Job for MirrorSyncJob {
	fn id(&self) -> &str {
		"mirror-sync"
	}

	fn name(&self) -> &str {
		"Mirror Sync"
	}

	fn description(&self) -> &str {
		"Copy provider releases from upstream registries into local mirrors"
	}

	#[instrument(skip(self, ctx), fields(job_id = "mirror-sync", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let reports = self.engine.sync_due(&ctx.cancellation_token).await.map_err(|e| {
			if e.is_transient() {
				JobError::retryable(format!("mirror sync failed: {e}"))
			} else {
				JobError::failed(format!("mirror sync failed: {e}"))
			}
		})?;

		// A run cut short by shutdown is recorded as cancelled, not succeeded.
		ctx.check_cancelled()?;

		let synced: usize = reports.iter().map(|r| r.synced()).sum();
		let failed: usize = reports.iter().map(|r| r.failed()).sum();
		let skipped: usize = reports.iter().map(|r| r.skipped.len()).sum();

		tracing::info!(mirrors = reports.len(), synced, failed, skipped, "mirror sync tick completed");
		Ok(JobOutput {
			message: format!(
				"Synced {} mirror(s): {synced} artifact(s) copied, {failed} failed",
				reports.len()
			),
			metadata: Some(serde_json::json!({
				"mirrors": reports.len(),
				"artifacts_synced": synced,
				"artifacts_failed": failed,
				"providers_skipped": skipped,
				"history_ids": reports.iter().map(|r| r.history_id).collect::<Vec<_>>(),
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use terrace_server_db::testing::{create_test_pool, make_mirror_config};
	use terrace_server_db::{MirrorRepository, MirrorStore, RegistryRepository, TriggerSource};
	use terrace_server_jobs::CancellationToken;
	use terrace_server_mirror::SyncSettings;
	use terrace_server_storage::LocalStorage;

	async fn engine(mirrors: Arc<MirrorRepository>, root: &std::path::Path) -> Arc<MirrorSyncEngine> {
		let pool = create_test_pool().await;
		Arc::new(MirrorSyncEngine::new(
			mirrors,
			Arc::new(RegistryRepository::new(pool)),
			Arc::new(LocalStorage::new(root)),
			SyncSettings::default(),
		))
	}

	fn ctx(token: CancellationToken) -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Schedule,
			cancellation_token: token,
		}
	}

	#[tokio::test]
	async fn test_no_due_mirrors_is_a_successful_noop() {
		let dir = tempfile::tempdir().unwrap();
		let mirrors = Arc::new(MirrorRepository::new(create_test_pool().await));
		let mut config = make_mirror_config("disabled");
		config.enabled = false;
		mirrors.create_config(&config).await.unwrap();

		let job = MirrorSyncJob::new(engine(mirrors, dir.path()).await);
		let output = job.run(&ctx(CancellationToken::new())).await.unwrap();
		assert_eq!(output.metadata.unwrap()["mirrors"], 0);
	}

	#[tokio::test]
	async fn test_cancelled_before_start() {
		let dir = tempfile::tempdir().unwrap();
		let mirrors = Arc::new(MirrorRepository::new(create_test_pool().await));
		let job = MirrorSyncJob::new(engine(mirrors, dir.path()).await);

		let token = CancellationToken::new();
		token.cancel();
		assert!(matches!(job.run(&ctx(token)).await, Err(JobError::Cancelled)));
	}
}
