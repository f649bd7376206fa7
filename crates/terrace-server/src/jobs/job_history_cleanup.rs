// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use terrace_server_db::JobStore;
use terrace_server_jobs::{Job, JobContext, JobError, JobOutput};

pub struct JobHistoryCleanupJob {
	store: Arc<dyn JobStore>,
	retention_days: u32,
}

impl JobHistoryCleanupJob {
	pub fn new(store: Arc<dyn JobStore>, retention_days: u32) -> Self {
		Self { store, retention_days }
	}
}

#[async_trait]
impl Job for JobHistoryCleanupJob {
	fn id(&self) -> &str {
		"job-history-cleanup"
	}

	fn name(&self) -> &str {
		"Job History Cleanup"
	}

	fn description(&self) -> &str {
		"Removes job run history older than the retention window"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let deleted = self
			.store
			.cleanup_old_runs(self.retention_days)
			.await
			.map_err(|e| JobError::retryable(format!("job history cleanup failed: {e}")))?;

		tracing::info!(deleted, retention_days = self.retention_days, "job history cleanup completed");
		Ok(JobOutput {
			message: format!("Removed {deleted} old job runs"),
			metadata: Some(serde_json::json!({
				"deleted_count": deleted,
				"retention_days": self.retention_days,
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use terrace_server_db::testing::create_test_pool;
	use terrace_server_db::{JobDefinition, JobRepository, JobRun, JobStatus, TriggerSource};
	use terrace_server_jobs::CancellationToken;

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Manual,
			cancellation_token: CancellationToken::new(),
		}
	}

	#[tokio::test]
	async fn test_cleanup_keeps_recent_runs() {
		let repo = Arc::new(JobRepository::new(create_test_pool().await));
		repo
			.upsert_definition(&JobDefinition {
				id: "mirror-sync".to_string(),
				name: "Mirror Sync".to_string(),
				description: String::new(),
				job_type: "periodic".to_string(),
				interval_secs: Some(300),
				enabled: true,
			})
			.await
			.unwrap();
		repo
			.record_run_start(&JobRun {
				id: "run-recent".to_string(),
				job_id: "mirror-sync".to_string(),
				status: JobStatus::Running,
				started_at: Utc::now(),
				completed_at: None,
				duration_ms: None,
				error_message: None,
				retry_count: 0,
				triggered_by: TriggerSource::Schedule,
				metadata: None,
			})
			.await
			.unwrap();
		repo
			.record_run_complete("run-recent", JobStatus::Succeeded, None, None)
			.await
			.unwrap();

		let job = JobHistoryCleanupJob::new(repo.clone(), 30);
		let output = job.run(&ctx()).await.unwrap();
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["deleted_count"], 0);
		assert_eq!(metadata["retention_days"], 30);
		assert!(repo.get_run("run-recent").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_cancelled_before_start() {
		let repo = Arc::new(JobRepository::new(create_test_pool().await));
		let job = JobHistoryCleanupJob::new(repo, 30);
		let ctx = ctx();
		ctx.cancellation_token.cancel();
		assert!(matches!(job.run(&ctx).await, Err(JobError::Cancelled)));
	}
}
