// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook delivery audit log and tag immutability violations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::row;

/// Processing state of a webhook delivery.
///
/// `Logged` is the durable checkpoint: a row exists before any publish work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
	Received,
	Verifying,
	Logged,
	Processing,
	Completed,
	Failed,
}

impl DeliveryState {
	pub fn as_str(&self) -> &'static str {
		match self {
			DeliveryState::Received => "received",
			DeliveryState::Verifying => "verifying",
			DeliveryState::Logged => "logged",
			DeliveryState::Processing => "processing",
			DeliveryState::Completed => "completed",
			DeliveryState::Failed => "failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, DeliveryState::Completed | DeliveryState::Failed)
	}
}

impl std::fmt::Display for DeliveryState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for DeliveryState {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"received" => Ok(DeliveryState::Received),
			"verifying" => Ok(DeliveryState::Verifying),
			"logged" => Ok(DeliveryState::Logged),
			"processing" => Ok(DeliveryState::Processing),
			"completed" => Ok(DeliveryState::Completed),
			"failed" => Ok(DeliveryState::Failed),
			_ => Err(format!("unknown delivery state: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryLog {
	pub id: Uuid,
	pub link_id: Uuid,
	/// Provider-supplied delivery id, the idempotency anchor.
	pub event_id: String,
	pub event_type: String,
	pub git_ref: Option<String>,
	pub commit_sha: Option<String>,
	pub tag_name: Option<String>,
	pub payload: String,
	pub headers: BTreeMap<String, String>,
	pub signature: Option<String>,
	pub signature_valid: bool,
	pub state: DeliveryState,
	pub version_id: Option<Uuid>,
	pub error: Option<String>,
	pub received_at: DateTime<Utc>,
	pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmutabilityViolation {
	pub id: Uuid,
	pub module_version_id: Uuid,
	pub tag_name: String,
	pub original_commit: String,
	pub observed_commit: String,
	pub detected_at: DateTime<Utc>,
	pub resolved: bool,
	pub resolved_at: Option<DateTime<Utc>>,
	pub resolved_by: Option<Uuid>,
	pub notes: Option<String>,
}

#[async_trait]
pub trait WebhookLogStore: Send + Sync {
	async fn create_log(&self, log: &WebhookDeliveryLog) -> Result<()>;
	async fn get_log(&self, id: Uuid) -> Result<Option<WebhookDeliveryLog>>;
	/// Earliest log for a provider delivery id on this link.
	async fn find_by_event_id(&self, link_id: Uuid, event_id: &str) -> Result<Option<WebhookDeliveryLog>>;
	async fn update_state(
		&self,
		id: Uuid,
		state: DeliveryState,
		version_id: Option<Uuid>,
		error: Option<&str>,
	) -> Result<()>;
	async fn list_by_link(&self, link_id: Uuid, limit: u32) -> Result<Vec<WebhookDeliveryLog>>;
}

#[async_trait]
pub trait ImmutabilityViolationStore: Send + Sync {
	async fn create_violation(&self, violation: &ImmutabilityViolation) -> Result<()>;
	/// True if an unresolved violation already records this observed commit.
	async fn exists_unresolved(&self, module_version_id: Uuid, observed_commit: &str) -> Result<bool>;
	async fn list_unresolved(&self) -> Result<Vec<ImmutabilityViolation>>;
}

#[derive(Clone)]
pub struct DeliveryRepository {
	pool: SqlitePool,
}

const LOG_COLUMNS: &str = "id, link_id, event_id, event_type, git_ref, commit_sha, tag_name, payload, headers, signature, signature_valid, state, version_id, error, received_at, processed_at";

impl DeliveryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, log), fields(log_id = %log.id, link_id = %log.link_id, event_id = %log.event_id))]
	pub async fn create_log(&self, log: &WebhookDeliveryLog) -> Result<()> {
		sqlx::query(&format!(
			"INSERT INTO webhook_delivery_logs ({LOG_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(log.id.to_string())
		.bind(log.link_id.to_string())
		.bind(&log.event_id)
		.bind(&log.event_type)
		.bind(&log.git_ref)
		.bind(&log.commit_sha)
		.bind(&log.tag_name)
		.bind(&log.payload)
		.bind(serde_json::to_string(&log.headers)?)
		.bind(&log.signature)
		.bind(log.signature_valid)
		.bind(log.state.as_str())
		.bind(log.version_id.map(|id| id.to_string()))
		.bind(&log.error)
		.bind(row::ts(&log.received_at))
		.bind(row::opt_ts(&log.processed_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(log_id = %id))]
	pub async fn get_log(&self, id: Uuid) -> Result<Option<WebhookDeliveryLog>> {
		let row = sqlx::query(&format!(
			"SELECT {LOG_COLUMNS} FROM webhook_delivery_logs WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_log(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(link_id = %link_id, event_id = %event_id))]
	pub async fn find_by_event_id(&self, link_id: Uuid, event_id: &str) -> Result<Option<WebhookDeliveryLog>> {
		let row = sqlx::query(&format!(
			"SELECT {LOG_COLUMNS} FROM webhook_delivery_logs WHERE link_id = ? AND event_id = ? ORDER BY received_at ASC LIMIT 1"
		))
		.bind(link_id.to_string())
		.bind(event_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_log(&r)).transpose()
	}

	#[tracing::instrument(skip(self, error), fields(log_id = %id, state = %state))]
	pub async fn update_state(
		&self,
		id: Uuid,
		state: DeliveryState,
		version_id: Option<Uuid>,
		error: Option<&str>,
	) -> Result<()> {
		let processed_at = state.is_terminal().then(|| row::ts(&Utc::now()));
		let result = sqlx::query(
			r#"
			UPDATE webhook_delivery_logs
			SET state = ?,
				version_id = COALESCE(?, version_id),
				error = COALESCE(?, error),
				processed_at = COALESCE(?, processed_at)
			WHERE id = ?
			"#,
		)
		.bind(state.as_str())
		.bind(version_id.map(|id| id.to_string()))
		.bind(error)
		.bind(processed_at)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("webhook delivery log {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(link_id = %link_id))]
	pub async fn list_by_link(&self, link_id: Uuid, limit: u32) -> Result<Vec<WebhookDeliveryLog>> {
		let rows = sqlx::query(&format!(
			"SELECT {LOG_COLUMNS} FROM webhook_delivery_logs WHERE link_id = ? ORDER BY received_at DESC LIMIT ?"
		))
		.bind(link_id.to_string())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_log).collect()
	}

	#[tracing::instrument(skip(self, v), fields(module_version_id = %v.module_version_id, tag = %v.tag_name))]
	pub async fn create_violation(&self, v: &ImmutabilityViolation) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO immutability_violations (id, module_version_id, tag_name, original_commit, observed_commit,
				detected_at, resolved, resolved_at, resolved_by, notes)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(v.id.to_string())
		.bind(v.module_version_id.to_string())
		.bind(&v.tag_name)
		.bind(&v.original_commit)
		.bind(&v.observed_commit)
		.bind(row::ts(&v.detected_at))
		.bind(v.resolved)
		.bind(row::opt_ts(&v.resolved_at))
		.bind(v.resolved_by.map(|id| id.to_string()))
		.bind(&v.notes)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(module_version_id = %module_version_id))]
	pub async fn exists_unresolved(&self, module_version_id: Uuid, observed_commit: &str) -> Result<bool> {
		let (count,): (i64,) = sqlx::query_as(
			r#"
			SELECT COUNT(*) FROM immutability_violations
			WHERE module_version_id = ? AND observed_commit = ? AND resolved = 0
			"#,
		)
		.bind(module_version_id.to_string())
		.bind(observed_commit)
		.fetch_one(&self.pool)
		.await?;

		Ok(count > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_unresolved(&self) -> Result<Vec<ImmutabilityViolation>> {
		let rows = sqlx::query(
			r#"
			SELECT id, module_version_id, tag_name, original_commit, observed_commit, detected_at, resolved,
				resolved_at, resolved_by, notes
			FROM immutability_violations
			WHERE resolved = 0
			ORDER BY detected_at DESC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_violation).collect()
	}
}

#[async_trait]
impl WebhookLogStore for DeliveryRepository {
	async fn create_log(&self, log: &WebhookDeliveryLog) -> Result<()> {
		DeliveryRepository::create_log(self, log).await
	}

	async fn get_log(&self, id: Uuid) -> Result<Option<WebhookDeliveryLog>> {
		DeliveryRepository::get_log(self, id).await
	}

	async fn find_by_event_id(&self, link_id: Uuid, event_id: &str) -> Result<Option<WebhookDeliveryLog>> {
		DeliveryRepository::find_by_event_id(self, link_id, event_id).await
	}

	async fn update_state(
		&self,
		id: Uuid,
		state: DeliveryState,
		version_id: Option<Uuid>,
		error: Option<&str>,
	) -> Result<()> {
		DeliveryRepository::update_state(self, id, state, version_id, error).await
	}

	async fn list_by_link(&self, link_id: Uuid, limit: u32) -> Result<Vec<WebhookDeliveryLog>> {
		DeliveryRepository::list_by_link(self, link_id, limit).await
	}
}

#[async_trait]
impl ImmutabilityViolationStore for DeliveryRepository {
	async fn create_violation(&self, violation: &ImmutabilityViolation) -> Result<()> {
		DeliveryRepository::create_violation(self, violation).await
	}

	async fn exists_unresolved(&self, module_version_id: Uuid, observed_commit: &str) -> Result<bool> {
		DeliveryRepository::exists_unresolved(self, module_version_id, observed_commit).await
	}

	async fn list_unresolved(&self) -> Result<Vec<ImmutabilityViolation>> {
		DeliveryRepository::list_unresolved(self).await
	}
}

fn row_to_log(r: &SqliteRow) -> Result<WebhookDeliveryLog> {
	let headers: String = r.try_get("headers")?;
	Ok(WebhookDeliveryLog {
		id: row::uuid(r, "id")?,
		link_id: row::uuid(r, "link_id")?,
		event_id: r.try_get("event_id")?,
		event_type: r.try_get("event_type")?,
		git_ref: r.try_get("git_ref")?,
		commit_sha: r.try_get("commit_sha")?,
		tag_name: r.try_get("tag_name")?,
		payload: r.try_get("payload")?,
		headers: serde_json::from_str(&headers)?,
		signature: r.try_get("signature")?,
		signature_valid: row::flag(r, "signature_valid")?,
		state: row::enum_column(r, "state")?,
		version_id: row::opt_uuid(r, "version_id")?,
		error: r.try_get("error")?,
		received_at: row::timestamp(r, "received_at")?,
		processed_at: row::opt_timestamp(r, "processed_at")?,
	})
}

fn row_to_violation(r: &SqliteRow) -> Result<ImmutabilityViolation> {
	Ok(ImmutabilityViolation {
		id: row::uuid(r, "id")?,
		module_version_id: row::uuid(r, "module_version_id")?,
		tag_name: r.try_get("tag_name")?,
		original_commit: r.try_get("original_commit")?,
		observed_commit: r.try_get("observed_commit")?,
		detected_at: row::timestamp(r, "detected_at")?,
		resolved: row::flag(r, "resolved")?,
		resolved_at: row::opt_timestamp(r, "resolved_at")?,
		resolved_by: row::opt_uuid(r, "resolved_by")?,
		notes: r.try_get("notes")?,
	})
}
