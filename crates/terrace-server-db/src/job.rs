// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, SqlitePool, Row};

use crate::error::{DbError, Result};
use crate::row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Running => "running",
			JobStatus::Succeeded => "succeeded",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(JobStatus::Running),
			"succeeded" => Ok(JobStatus::Succeeded),
			"failed" => Ok(JobStatus::Failed),
			"cancelled" => Ok(JobStatus::Cancelled),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Manual,
	Retry,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Manual => "manual",
			TriggerSource::Retry => "retry",
		}
	}
}

impl std::str::FromStr for TriggerSource {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"schedule" => Ok(TriggerSource::Schedule),
			"manual" => Ok(TriggerSource::Manual),
			"retry" => Ok(TriggerSource::Retry),
			_ => Err(format!("unknown trigger source: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
	pub id: String,
	pub name: String,
	pub description: String,
	pub job_type: String,
	pub interval_secs: Option<i64>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub triggered_by: TriggerSource,
	pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()>;
	async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>>;
	async fn record_run_start(&self, run: &JobRun) -> Result<()>;
	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()>;
	async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>>;
	async fn list_runs(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>>;
	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32>;
	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64>;
}

#[derive(Clone)]
pub struct JobRepository {
	pool: SqlitePool,
}

const RUN_COLUMNS: &str = "id, job_id, status, started_at, completed_at, duration_ms, error_message, retry_count, triggered_by, metadata";

impl JobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, def), fields(job_id = %def.id))]
	pub async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		let now = row::ts(&Utc::now());
		sqlx::query(
			r#"
			INSERT INTO job_definitions (id, name, description, job_type, interval_secs, enabled, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				description = excluded.description,
				job_type = excluded.job_type,
				interval_secs = excluded.interval_secs,
				enabled = excluded.enabled,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&def.id)
		.bind(&def.name)
		.bind(&def.description)
		.bind(&def.job_type)
		.bind(def.interval_secs)
		.bind(def.enabled)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>> {
		let row = sqlx::query(
			"SELECT id, name, description, job_type, interval_secs, enabled FROM job_definitions WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row
			.map(|r| {
				Ok(JobDefinition {
					id: r.try_get("id")?,
					name: r.try_get("name")?,
					description: r
						.try_get::<Option<String>, _>("description")?
						.unwrap_or_default(),
					job_type: r.try_get("job_type")?,
					interval_secs: r.try_get("interval_secs")?,
					enabled: row::flag(&r, "enabled")?,
				})
			})
			.transpose()
	}

	#[tracing::instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
	pub async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO job_runs (id, job_id, status, started_at, retry_count, triggered_by)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&run.id)
		.bind(&run.job_id)
		.bind(run.status.as_str())
		.bind(row::ts(&run.started_at))
		.bind(run.retry_count as i64)
		.bind(run.triggered_by.as_str())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, error, metadata))]
	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		let run = self
			.get_run(run_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("job run {run_id}")))?;
		let now = Utc::now();
		let duration_ms = (now - run.started_at).num_milliseconds().max(0);

		sqlx::query(
			r#"
			UPDATE job_runs
			SET status = ?, completed_at = ?, duration_ms = ?, error_message = ?, metadata = ?
			WHERE id = ?
			"#,
		)
		.bind(status.as_str())
		.bind(row::ts(&now))
		.bind(duration_ms)
		.bind(error)
		.bind(metadata.map(|m| m.to_string()))
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?"))
			.bind(run_id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| row_to_run(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_runs(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>> {
		let rows = sqlx::query(&format!(
			"SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT ?"
		))
		.bind(job_id)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_run).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		Ok(self.list_runs(job_id, 1).await?.into_iter().next())
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		let row = sqlx::query_as::<_, (i64,)>(
			r#"
			WITH ranked AS (
				SELECT status,
					ROW_NUMBER() OVER (ORDER BY started_at DESC) as rn
				FROM job_runs
				WHERE job_id = ?
			)
			SELECT COUNT(*) as count
			FROM ranked
			WHERE status = 'failed'
				AND rn <= (
					SELECT COALESCE(MIN(rn) - 1, (SELECT COUNT(*) FROM ranked))
					FROM ranked
					WHERE status != 'failed'
				)
			"#,
		)
		.bind(job_id)
		.fetch_one(&self.pool)
		.await?;

		Ok(row.0 as u32)
	}

	#[tracing::instrument(skip(self))]
	pub async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		let result = sqlx::query("DELETE FROM job_runs WHERE completed_at IS NOT NULL AND completed_at < ?")
			.bind(row::ts(&cutoff))
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

fn row_to_run(r: &SqliteRow) -> Result<JobRun> {
	let metadata: Option<String> = r.try_get("metadata")?;
	Ok(JobRun {
		id: r.try_get("id")?,
		job_id: r.try_get("job_id")?,
		status: row::enum_column(r, "status")?,
		started_at: row::timestamp(r, "started_at")?,
		completed_at: row::opt_timestamp(r, "completed_at")?,
		duration_ms: r.try_get("duration_ms")?,
		error_message: r.try_get("error_message")?,
		retry_count: r.try_get::<i64, _>("retry_count")? as u32,
		triggered_by: row::enum_column(r, "triggered_by")?,
		metadata: metadata.as_deref().and_then(|s| serde_json::from_str(s).ok()),
	})
}

#[async_trait]
impl JobStore for JobRepository {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		JobRepository::upsert_definition(self, def).await
	}

	async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>> {
		JobRepository::get_definition(self, id).await
	}

	async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		JobRepository::record_run_start(self, run).await
	}

	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		JobRepository::record_run_complete(self, run_id, status, error, metadata).await
	}

	async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>> {
		JobRepository::get_run(self, run_id).await
	}

	async fn list_runs(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>> {
		JobRepository::list_runs(self, job_id, limit).await
	}

	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		JobRepository::get_last_run(self, job_id).await
	}

	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		JobRepository::count_consecutive_failures(self, job_id).await
	}

	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		JobRepository::cleanup_old_runs(self, retention_days).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn make_definition(id: &str) -> JobDefinition {
		JobDefinition {
			id: id.to_string(),
			name: "Mirror sync".to_string(),
			description: "Sync enabled mirrors".to_string(),
			job_type: "periodic".to_string(),
			interval_secs: Some(300),
			enabled: true,
		}
	}

	fn make_run(id: &str, job_id: &str, started_at: DateTime<Utc>) -> JobRun {
		JobRun {
			id: id.to_string(),
			job_id: job_id.to_string(),
			status: JobStatus::Running,
			started_at,
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	#[tokio::test]
	async fn test_upsert_definition_updates_in_place() {
		let repo = JobRepository::new(create_test_pool().await);

		let def = make_definition("mirror-sync");
		repo.upsert_definition(&def).await.unwrap();
		repo
			.upsert_definition(&JobDefinition {
				enabled: false,
				..def
			})
			.await
			.unwrap();

		let stored = repo.get_definition("mirror-sync").await.unwrap().unwrap();
		assert!(!stored.enabled);
		assert_eq!(stored.interval_secs, Some(300));
	}

	#[tokio::test]
	async fn test_record_run_complete_sets_duration_and_error() {
		let repo = JobRepository::new(create_test_pool().await);
		repo.upsert_definition(&make_definition("job-1")).await.unwrap();

		let run = make_run("run-1", "job-1", Utc::now() - chrono::Duration::seconds(2));
		repo.record_run_start(&run).await.unwrap();
		repo
			.record_run_complete(
				"run-1",
				JobStatus::Failed,
				Some("upstream unavailable".to_string()),
				Some(serde_json::json!({"providers_failed": 1})),
			)
			.await
			.unwrap();

		let stored = repo.get_run("run-1").await.unwrap().unwrap();
		assert_eq!(stored.status, JobStatus::Failed);
		assert!(stored.duration_ms.unwrap() >= 2000);
		assert_eq!(stored.error_message.as_deref(), Some("upstream unavailable"));
		assert_eq!(stored.metadata.unwrap()["providers_failed"], 1);
	}

	#[tokio::test]
	async fn test_record_run_complete_unknown_run() {
		let repo = JobRepository::new(create_test_pool().await);
		let result = repo
			.record_run_complete("missing", JobStatus::Succeeded, None, None)
			.await;
		assert!(matches!(result, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_get_last_run_returns_newest() {
		let repo = JobRepository::new(create_test_pool().await);
		repo.upsert_definition(&make_definition("job-1")).await.unwrap();

		assert!(repo.get_last_run("job-1").await.unwrap().is_none());

		repo
			.record_run_start(&make_run("run-1", "job-1", Utc::now() - chrono::Duration::hours(1)))
			.await
			.unwrap();
		repo
			.record_run_start(&make_run("run-2", "job-1", Utc::now()))
			.await
			.unwrap();

		assert_eq!(repo.get_last_run("job-1").await.unwrap().unwrap().id, "run-2");
	}

	#[tokio::test]
	async fn test_count_consecutive_failures_stops_at_success() {
		let repo = JobRepository::new(create_test_pool().await);
		repo.upsert_definition(&make_definition("job-1")).await.unwrap();

		let base = Utc::now() - chrono::Duration::minutes(10);
		let outcomes = [JobStatus::Failed, JobStatus::Succeeded, JobStatus::Failed, JobStatus::Failed];
		for (i, status) in outcomes.iter().enumerate() {
			let id = format!("run-{i}");
			repo
				.record_run_start(&make_run(&id, "job-1", base + chrono::Duration::minutes(i as i64)))
				.await
				.unwrap();
			repo.record_run_complete(&id, *status, None, None).await.unwrap();
		}

		assert_eq!(repo.count_consecutive_failures("job-1").await.unwrap(), 2);
		assert_eq!(repo.count_consecutive_failures("other").await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_cleanup_old_runs() {
		let pool = create_test_pool().await;
		let repo = JobRepository::new(pool.clone());
		repo.upsert_definition(&make_definition("job-1")).await.unwrap();

		for id in ["old-run", "new-run"] {
			repo.record_run_start(&make_run(id, "job-1", Utc::now())).await.unwrap();
			repo
				.record_run_complete(id, JobStatus::Succeeded, None, None)
				.await
				.unwrap();
		}
		sqlx::query("UPDATE job_runs SET completed_at = ? WHERE id = ?")
			.bind(row::ts(&(Utc::now() - chrono::Duration::days(10))))
			.bind("old-run")
			.execute(&pool)
			.await
			.unwrap();

		assert_eq!(repo.cleanup_old_runs(7).await.unwrap(), 1);
		assert!(repo.get_run("old-run").await.unwrap().is_none());
		assert!(repo.get_run("new-run").await.unwrap().is_some());
	}
}
