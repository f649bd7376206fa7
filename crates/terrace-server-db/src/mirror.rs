// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Upstream registry mirrors, their policies, approvals and sync provenance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::error::{conflict_on_unique, DbError, Result};
use crate::row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Running,
	Success,
	Failed,
	Cancelled,
}

impl SyncStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncStatus::Running => "running",
			SyncStatus::Success => "success",
			SyncStatus::Failed => "failed",
			SyncStatus::Cancelled => "cancelled",
		}
	}
}

impl std::fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for SyncStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(SyncStatus::Running),
			"success" => Ok(SyncStatus::Success),
			"failed" => Ok(SyncStatus::Failed),
			"cancelled" => Ok(SyncStatus::Cancelled),
			_ => Err(format!("unknown sync status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
	Allow,
	Deny,
}

impl PolicyType {
	pub fn as_str(&self) -> &'static str {
		match self {
			PolicyType::Allow => "allow",
			PolicyType::Deny => "deny",
		}
	}
}

impl std::str::FromStr for PolicyType {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"allow" => Ok(PolicyType::Allow),
			"deny" => Ok(PolicyType::Deny),
			_ => Err(format!("unknown policy type: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
	Pending,
	Approved,
	Rejected,
}

impl ApprovalStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ApprovalStatus::Pending => "pending",
			ApprovalStatus::Approved => "approved",
			ApprovalStatus::Rejected => "rejected",
		}
	}
}

impl std::str::FromStr for ApprovalStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(ApprovalStatus::Pending),
			"approved" => Ok(ApprovalStatus::Approved),
			"rejected" => Ok(ApprovalStatus::Rejected),
			_ => Err(format!("unknown approval status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
	pub id: Uuid,
	pub name: String,
	pub description: Option<String>,
	pub upstream_url: String,
	pub organization_id: Option<Uuid>,
	/// Empty means every namespace.
	pub namespace_filter: Vec<String>,
	pub provider_filter: Vec<String>,
	pub version_filter: Option<String>,
	/// `os/arch` entries; empty means every platform.
	pub platform_filter: Vec<String>,
	pub enabled: bool,
	pub sync_interval_hours: i64,
	pub requires_approval: bool,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub last_sync_status: Option<SyncStatus>,
	pub last_sync_error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl MirrorConfig {
	/// Enabled and never synced, or the sync interval has elapsed.
	pub fn is_due(&self, now: DateTime<Utc>) -> bool {
		if !self.enabled {
			return false;
		}
		match self.last_sync_at {
			None => true,
			Some(at) => now - at >= chrono::Duration::hours(self.sync_interval_hours.max(0)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorPolicy {
	pub id: Uuid,
	/// `None` for global policies.
	pub organization_id: Option<Uuid>,
	pub name: String,
	pub policy_type: PolicyType,
	pub upstream_pattern: Option<String>,
	pub namespace_pattern: Option<String>,
	pub provider_pattern: Option<String>,
	pub priority: i64,
	pub is_active: bool,
	pub requires_approval: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorApprovalRequest {
	pub id: Uuid,
	pub mirror_config_id: Uuid,
	pub organization_id: Option<Uuid>,
	pub namespace: String,
	/// `None` approves the whole namespace.
	pub provider_name: Option<String>,
	pub requested_by: Option<Uuid>,
	pub reason: Option<String>,
	pub status: ApprovalStatus,
	pub reviewed_by: Option<Uuid>,
	pub reviewed_at: Option<DateTime<Utc>>,
	pub expires_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredProvider {
	pub id: Uuid,
	pub mirror_config_id: Uuid,
	pub provider_id: Uuid,
	pub upstream_namespace: String,
	pub upstream_type: String,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub last_sync_version: Option<String>,
	pub sync_enabled: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredProviderVersion {
	pub id: Uuid,
	pub mirrored_provider_id: Uuid,
	pub provider_version_id: Uuid,
	pub upstream_version: String,
	pub shasum_verified: bool,
	pub gpg_verified: bool,
	pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSyncHistory {
	pub id: Uuid,
	pub mirror_config_id: Uuid,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub status: SyncStatus,
	pub providers_synced: i64,
	pub providers_failed: i64,
	pub error_message: Option<String>,
	pub sync_details: Option<serde_json::Value>,
}

/// Final numbers written when a sync run ends.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
	pub status: SyncStatus,
	pub providers_synced: i64,
	pub providers_failed: i64,
	pub error_message: Option<String>,
	pub sync_details: Option<serde_json::Value>,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
	async fn get_config(&self, id: Uuid) -> Result<Option<MirrorConfig>>;
	async fn create_config(&self, config: &MirrorConfig) -> Result<()>;
	async fn list_enabled_configs(&self) -> Result<Vec<MirrorConfig>>;
	async fn update_sync_status(
		&self,
		id: Uuid,
		status: SyncStatus,
		at: DateTime<Utc>,
		error: Option<&str>,
	) -> Result<()>;

	/// Active global policies plus those of `organization_id`, highest priority first.
	async fn list_active_policies(&self, organization_id: Option<Uuid>) -> Result<Vec<MirrorPolicy>>;
	async fn create_policy(&self, policy: &MirrorPolicy) -> Result<()>;

	/// Newest request covering the namespace, either for this provider or namespace-wide.
	async fn find_approval(
		&self,
		mirror_config_id: Uuid,
		namespace: &str,
		provider_name: &str,
	) -> Result<Option<MirrorApprovalRequest>>;
	async fn create_approval(&self, request: &MirrorApprovalRequest) -> Result<()>;
	async fn review_approval(&self, id: Uuid, status: ApprovalStatus, reviewer: Option<Uuid>) -> Result<()>;

	async fn get_mirrored_provider(&self, provider_id: Uuid) -> Result<Option<MirroredProvider>>;
	/// Fails with [`DbError::Conflict`] if another mirror owns the provider.
	async fn create_mirrored_provider(&self, provider: &MirroredProvider) -> Result<()>;
	async fn touch_mirrored_provider(&self, id: Uuid, version: &str, at: DateTime<Utc>) -> Result<()>;
	async fn get_mirrored_version(
		&self,
		mirrored_provider_id: Uuid,
		upstream_version: &str,
	) -> Result<Option<MirroredProviderVersion>>;
	async fn create_mirrored_version(&self, version: &MirroredProviderVersion) -> Result<()>;

	async fn create_history(&self, history: &MirrorSyncHistory) -> Result<()>;
	async fn complete_history(&self, id: Uuid, outcome: &SyncOutcome) -> Result<()>;
	async fn list_history(&self, mirror_config_id: Uuid, limit: u32) -> Result<Vec<MirrorSyncHistory>>;
}

#[derive(Clone)]
pub struct MirrorRepository {
	pool: SqlitePool,
}

const CONFIG_COLUMNS: &str = "id, name, description, upstream_url, organization_id, namespace_filter, provider_filter, version_filter, platform_filter, enabled, sync_interval_hours, requires_approval, last_sync_at, last_sync_status, last_sync_error, created_at, updated_at";

const APPROVAL_COLUMNS: &str = "id, mirror_config_id, organization_id, namespace, provider_name, requested_by, reason, status, reviewed_by, reviewed_at, expires_at, created_at";

const HISTORY_COLUMNS: &str = "id, mirror_config_id, started_at, completed_at, status, providers_synced, providers_failed, error_message, sync_details";

impl MirrorRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Configs
	// =========================================================================

	#[tracing::instrument(skip(self), fields(mirror_id = %id))]
	pub async fn get_config(&self, id: Uuid) -> Result<Option<MirrorConfig>> {
		let row = sqlx::query(&format!("SELECT {CONFIG_COLUMNS} FROM mirror_configs WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| row_to_config(&r)).transpose()
	}

	#[tracing::instrument(skip(self, c), fields(mirror_id = %c.id, name = %c.name))]
	pub async fn create_config(&self, c: &MirrorConfig) -> Result<()> {
		sqlx::query(&format!(
			"INSERT INTO mirror_configs ({CONFIG_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(c.id.to_string())
		.bind(&c.name)
		.bind(&c.description)
		.bind(&c.upstream_url)
		.bind(c.organization_id.map(|id| id.to_string()))
		.bind(serde_json::to_string(&c.namespace_filter)?)
		.bind(serde_json::to_string(&c.provider_filter)?)
		.bind(&c.version_filter)
		.bind(serde_json::to_string(&c.platform_filter)?)
		.bind(c.enabled)
		.bind(c.sync_interval_hours)
		.bind(c.requires_approval)
		.bind(row::opt_ts(&c.last_sync_at))
		.bind(c.last_sync_status.map(|s| s.as_str()))
		.bind(&c.last_sync_error)
		.bind(row::ts(&c.created_at))
		.bind(row::ts(&c.updated_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique(format!("mirror {} already exists", c.name)))?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_enabled_configs(&self) -> Result<Vec<MirrorConfig>> {
		let rows = sqlx::query(&format!(
			"SELECT {CONFIG_COLUMNS} FROM mirror_configs WHERE enabled = 1 ORDER BY name"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_config).collect()
	}

	#[tracing::instrument(skip(self, error), fields(mirror_id = %id, status = %status))]
	pub async fn update_sync_status(
		&self,
		id: Uuid,
		status: SyncStatus,
		at: DateTime<Utc>,
		error: Option<&str>,
	) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE mirror_configs
			SET last_sync_at = ?, last_sync_status = ?, last_sync_error = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(row::ts(&at))
		.bind(status.as_str())
		.bind(error)
		.bind(row::ts(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("mirror {id}")));
		}
		Ok(())
	}

	// =========================================================================
	// Policies and approvals
	// =========================================================================

	#[tracing::instrument(skip(self))]
	pub async fn list_active_policies(&self, organization_id: Option<Uuid>) -> Result<Vec<MirrorPolicy>> {
		let rows = sqlx::query(
			r#"
			SELECT id, organization_id, name, policy_type, upstream_pattern, namespace_pattern, provider_pattern,
				priority, is_active, requires_approval, created_at
			FROM mirror_policies
			WHERE is_active = 1 AND (organization_id IS NULL OR organization_id = ?)
			ORDER BY priority DESC, created_at ASC
			"#,
		)
		.bind(organization_id.map(|id| id.to_string()))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_policy).collect()
	}

	#[tracing::instrument(skip(self, p), fields(policy_id = %p.id, name = %p.name))]
	pub async fn create_policy(&self, p: &MirrorPolicy) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO mirror_policies (id, organization_id, name, policy_type, upstream_pattern, namespace_pattern,
				provider_pattern, priority, is_active, requires_approval, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(p.id.to_string())
		.bind(p.organization_id.map(|id| id.to_string()))
		.bind(&p.name)
		.bind(p.policy_type.as_str())
		.bind(&p.upstream_pattern)
		.bind(&p.namespace_pattern)
		.bind(&p.provider_pattern)
		.bind(p.priority)
		.bind(p.is_active)
		.bind(p.requires_approval)
		.bind(row::ts(&p.created_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(mirror_id = %mirror_config_id))]
	pub async fn find_approval(
		&self,
		mirror_config_id: Uuid,
		namespace: &str,
		provider_name: &str,
	) -> Result<Option<MirrorApprovalRequest>> {
		let row = sqlx::query(&format!(
			r#"
			SELECT {APPROVAL_COLUMNS}
			FROM mirror_approval_requests
			WHERE mirror_config_id = ? AND namespace = ? AND (provider_name IS NULL OR provider_name = ?)
			ORDER BY created_at DESC
			LIMIT 1
			"#
		))
		.bind(mirror_config_id.to_string())
		.bind(namespace)
		.bind(provider_name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_approval(&r)).transpose()
	}

	#[tracing::instrument(skip(self, a), fields(approval_id = %a.id, namespace = %a.namespace))]
	pub async fn create_approval(&self, a: &MirrorApprovalRequest) -> Result<()> {
		sqlx::query(&format!(
			"INSERT INTO mirror_approval_requests ({APPROVAL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(a.id.to_string())
		.bind(a.mirror_config_id.to_string())
		.bind(a.organization_id.map(|id| id.to_string()))
		.bind(&a.namespace)
		.bind(&a.provider_name)
		.bind(a.requested_by.map(|id| id.to_string()))
		.bind(&a.reason)
		.bind(a.status.as_str())
		.bind(a.reviewed_by.map(|id| id.to_string()))
		.bind(row::opt_ts(&a.reviewed_at))
		.bind(row::opt_ts(&a.expires_at))
		.bind(row::ts(&a.created_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(approval_id = %id))]
	pub async fn review_approval(&self, id: Uuid, status: ApprovalStatus, reviewer: Option<Uuid>) -> Result<()> {
		let result = sqlx::query(
			"UPDATE mirror_approval_requests SET status = ?, reviewed_by = ?, reviewed_at = ? WHERE id = ?",
		)
		.bind(status.as_str())
		.bind(reviewer.map(|id| id.to_string()))
		.bind(row::ts(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("approval request {id}")));
		}
		Ok(())
	}

	// =========================================================================
	// Provenance
	// =========================================================================

	#[tracing::instrument(skip(self), fields(provider_id = %provider_id))]
	pub async fn get_mirrored_provider(&self, provider_id: Uuid) -> Result<Option<MirroredProvider>> {
		let row = sqlx::query(
			r#"
			SELECT id, mirror_config_id, provider_id, upstream_namespace, upstream_type, last_synced_at,
				last_sync_version, sync_enabled, created_at
			FROM mirrored_providers
			WHERE provider_id = ?
			"#,
		)
		.bind(provider_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_mirrored_provider(&r)).transpose()
	}

	#[tracing::instrument(skip(self, p), fields(mirror_id = %p.mirror_config_id, provider_id = %p.provider_id))]
	pub async fn create_mirrored_provider(&self, p: &MirroredProvider) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO mirrored_providers (id, mirror_config_id, provider_id, upstream_namespace, upstream_type,
				last_synced_at, last_sync_version, sync_enabled, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(p.id.to_string())
		.bind(p.mirror_config_id.to_string())
		.bind(p.provider_id.to_string())
		.bind(&p.upstream_namespace)
		.bind(&p.upstream_type)
		.bind(row::opt_ts(&p.last_synced_at))
		.bind(&p.last_sync_version)
		.bind(p.sync_enabled)
		.bind(row::ts(&p.created_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique("provider is already owned by a mirror"))?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(mirrored_provider_id = %id, version = %version))]
	pub async fn touch_mirrored_provider(&self, id: Uuid, version: &str, at: DateTime<Utc>) -> Result<()> {
		sqlx::query("UPDATE mirrored_providers SET last_synced_at = ?, last_sync_version = ? WHERE id = ?")
			.bind(row::ts(&at))
			.bind(version)
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(mirrored_provider_id = %mirrored_provider_id, version = %upstream_version))]
	pub async fn get_mirrored_version(
		&self,
		mirrored_provider_id: Uuid,
		upstream_version: &str,
	) -> Result<Option<MirroredProviderVersion>> {
		let row = sqlx::query(
			r#"
			SELECT id, mirrored_provider_id, provider_version_id, upstream_version, shasum_verified, gpg_verified,
				synced_at
			FROM mirrored_provider_versions
			WHERE mirrored_provider_id = ? AND upstream_version = ?
			"#,
		)
		.bind(mirrored_provider_id.to_string())
		.bind(upstream_version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_mirrored_version(&r)).transpose()
	}

	#[tracing::instrument(skip(self, v), fields(mirrored_provider_id = %v.mirrored_provider_id, version = %v.upstream_version))]
	pub async fn create_mirrored_version(&self, v: &MirroredProviderVersion) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO mirrored_provider_versions (id, mirrored_provider_id, provider_version_id, upstream_version,
				shasum_verified, gpg_verified, synced_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(v.id.to_string())
		.bind(v.mirrored_provider_id.to_string())
		.bind(v.provider_version_id.to_string())
		.bind(&v.upstream_version)
		.bind(v.shasum_verified)
		.bind(v.gpg_verified)
		.bind(row::ts(&v.synced_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique(format!("version {} already mirrored", v.upstream_version)))?;

		Ok(())
	}

	// =========================================================================
	// History
	// =========================================================================

	#[tracing::instrument(skip(self, h), fields(history_id = %h.id, mirror_id = %h.mirror_config_id))]
	pub async fn create_history(&self, h: &MirrorSyncHistory) -> Result<()> {
		sqlx::query(&format!(
			"INSERT INTO mirror_sync_history ({HISTORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(h.id.to_string())
		.bind(h.mirror_config_id.to_string())
		.bind(row::ts(&h.started_at))
		.bind(row::opt_ts(&h.completed_at))
		.bind(h.status.as_str())
		.bind(h.providers_synced)
		.bind(h.providers_failed)
		.bind(&h.error_message)
		.bind(h.sync_details.as_ref().map(|d| d.to_string()))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, outcome), fields(history_id = %id, status = %outcome.status))]
	pub async fn complete_history(&self, id: Uuid, outcome: &SyncOutcome) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE mirror_sync_history
			SET completed_at = ?, status = ?, providers_synced = ?, providers_failed = ?, error_message = ?,
				sync_details = ?
			WHERE id = ?
			"#,
		)
		.bind(row::ts(&Utc::now()))
		.bind(outcome.status.as_str())
		.bind(outcome.providers_synced)
		.bind(outcome.providers_failed)
		.bind(&outcome.error_message)
		.bind(outcome.sync_details.as_ref().map(|d| d.to_string()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("sync history {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(mirror_id = %mirror_config_id))]
	pub async fn list_history(&self, mirror_config_id: Uuid, limit: u32) -> Result<Vec<MirrorSyncHistory>> {
		let rows = sqlx::query(&format!(
			"SELECT {HISTORY_COLUMNS} FROM mirror_sync_history WHERE mirror_config_id = ? ORDER BY started_at DESC LIMIT ?"
		))
		.bind(mirror_config_id.to_string())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_history).collect()
	}
}

#[async_trait]
impl MirrorStore for MirrorRepository {
	async fn get_config(&self, id: Uuid) -> Result<Option<MirrorConfig>> {
		MirrorRepository::get_config(self, id).await
	}

	async fn create_config(&self, config: &MirrorConfig) -> Result<()> {
		MirrorRepository::create_config(self, config).await
	}

	async fn list_enabled_configs(&self) -> Result<Vec<MirrorConfig>> {
		MirrorRepository::list_enabled_configs(self).await
	}

	async fn update_sync_status(
		&self,
		id: Uuid,
		status: SyncStatus,
		at: DateTime<Utc>,
		error: Option<&str>,
	) -> Result<()> {
		MirrorRepository::update_sync_status(self, id, status, at, error).await
	}

	async fn list_active_policies(&self, organization_id: Option<Uuid>) -> Result<Vec<MirrorPolicy>> {
		MirrorRepository::list_active_policies(self, organization_id).await
	}

	async fn create_policy(&self, policy: &MirrorPolicy) -> Result<()> {
		MirrorRepository::create_policy(self, policy).await
	}

	async fn find_approval(
		&self,
		mirror_config_id: Uuid,
		namespace: &str,
		provider_name: &str,
	) -> Result<Option<MirrorApprovalRequest>> {
		MirrorRepository::find_approval(self, mirror_config_id, namespace, provider_name).await
	}

	async fn create_approval(&self, request: &MirrorApprovalRequest) -> Result<()> {
		MirrorRepository::create_approval(self, request).await
	}

	async fn review_approval(&self, id: Uuid, status: ApprovalStatus, reviewer: Option<Uuid>) -> Result<()> {
		MirrorRepository::review_approval(self, id, status, reviewer).await
	}

	async fn get_mirrored_provider(&self, provider_id: Uuid) -> Result<Option<MirroredProvider>> {
		MirrorRepository::get_mirrored_provider(self, provider_id).await
	}

	async fn create_mirrored_provider(&self, provider: &MirroredProvider) -> Result<()> {
		MirrorRepository::create_mirrored_provider(self, provider).await
	}

	async fn touch_mirrored_provider(&self, id: Uuid, version: &str, at: DateTime<Utc>) -> Result<()> {
		MirrorRepository::touch_mirrored_provider(self, id, version, at).await
	}

	async fn get_mirrored_version(
		&self,
		mirrored_provider_id: Uuid,
		upstream_version: &str,
	) -> Result<Option<MirroredProviderVersion>> {
		MirrorRepository::get_mirrored_version(self, mirrored_provider_id, upstream_version).await
	}

	async fn create_mirrored_version(&self, version: &MirroredProviderVersion) -> Result<()> {
		MirrorRepository::create_mirrored_version(self, version).await
	}

	async fn create_history(&self, history: &MirrorSyncHistory) -> Result<()> {
		MirrorRepository::create_history(self, history).await
	}

	async fn complete_history(&self, id: Uuid, outcome: &SyncOutcome) -> Result<()> {
		MirrorRepository::complete_history(self, id, outcome).await
	}

	async fn list_history(&self, mirror_config_id: Uuid, limit: u32) -> Result<Vec<MirrorSyncHistory>> {
		MirrorRepository::list_history(self, mirror_config_id, limit).await
	}
}

fn row_to_config(r: &SqliteRow) -> Result<MirrorConfig> {
	let last_sync_status: Option<String> = r.try_get("last_sync_status")?;
	Ok(MirrorConfig {
		id: row::uuid(r, "id")?,
		name: r.try_get("name")?,
		description: r.try_get("description")?,
		upstream_url: r.try_get("upstream_url")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		namespace_filter: row::string_list(r, "namespace_filter")?,
		provider_filter: row::string_list(r, "provider_filter")?,
		version_filter: r.try_get("version_filter")?,
		platform_filter: row::string_list(r, "platform_filter")?,
		enabled: row::flag(r, "enabled")?,
		sync_interval_hours: r.try_get("sync_interval_hours")?,
		requires_approval: row::flag(r, "requires_approval")?,
		last_sync_at: row::opt_timestamp(r, "last_sync_at")?,
		last_sync_status: last_sync_status
			.map(|s| s.parse())
			.transpose()
			.map_err(DbError::Internal)?,
		last_sync_error: r.try_get("last_sync_error")?,
		created_at: row::timestamp(r, "created_at")?,
		updated_at: row::timestamp(r, "updated_at")?,
	})
}

fn row_to_policy(r: &SqliteRow) -> Result<MirrorPolicy> {
	Ok(MirrorPolicy {
		id: row::uuid(r, "id")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		name: r.try_get("name")?,
		policy_type: row::enum_column(r, "policy_type")?,
		upstream_pattern: r.try_get("upstream_pattern")?,
		namespace_pattern: r.try_get("namespace_pattern")?,
		provider_pattern: r.try_get("provider_pattern")?,
		priority: r.try_get("priority")?,
		is_active: row::flag(r, "is_active")?,
		requires_approval: row::flag(r, "requires_approval")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_approval(r: &SqliteRow) -> Result<MirrorApprovalRequest> {
	Ok(MirrorApprovalRequest {
		id: row::uuid(r, "id")?,
		mirror_config_id: row::uuid(r, "mirror_config_id")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		namespace: r.try_get("namespace")?,
		provider_name: r.try_get("provider_name")?,
		requested_by: row::opt_uuid(r, "requested_by")?,
		reason: r.try_get("reason")?,
		status: row::enum_column(r, "status")?,
		reviewed_by: row::opt_uuid(r, "reviewed_by")?,
		reviewed_at: row::opt_timestamp(r, "reviewed_at")?,
		expires_at: row::opt_timestamp(r, "expires_at")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_mirrored_provider(r: &SqliteRow) -> Result<MirroredProvider> {
	Ok(MirroredProvider {
		id: row::uuid(r, "id")?,
		mirror_config_id: row::uuid(r, "mirror_config_id")?,
		provider_id: row::uuid(r, "provider_id")?,
		upstream_namespace: r.try_get("upstream_namespace")?,
		upstream_type: r.try_get("upstream_type")?,
		last_synced_at: row::opt_timestamp(r, "last_synced_at")?,
		last_sync_version: r.try_get("last_sync_version")?,
		sync_enabled: row::flag(r, "sync_enabled")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_mirrored_version(r: &SqliteRow) -> Result<MirroredProviderVersion> {
	Ok(MirroredProviderVersion {
		id: row::uuid(r, "id")?,
		mirrored_provider_id: row::uuid(r, "mirrored_provider_id")?,
		provider_version_id: row::uuid(r, "provider_version_id")?,
		upstream_version: r.try_get("upstream_version")?,
		shasum_verified: row::flag(r, "shasum_verified")?,
		gpg_verified: row::flag(r, "gpg_verified")?,
		synced_at: row::timestamp(r, "synced_at")?,
	})
}

fn row_to_history(r: &SqliteRow) -> Result<MirrorSyncHistory> {
	let details: Option<String> = r.try_get("sync_details")?;
	Ok(MirrorSyncHistory {
		id: row::uuid(r, "id")?,
		mirror_config_id: row::uuid(r, "mirror_config_id")?,
		started_at: row::timestamp(r, "started_at")?,
		completed_at: row::opt_timestamp(r, "completed_at")?,
		status: row::enum_column(r, "status")?,
		providers_synced: r.try_get("providers_synced")?,
		providers_failed: r.try_get("providers_failed")?,
		error_message: r.try_get("error_message")?,
		sync_details: details.as_deref().map(serde_json::from_str).transpose()?,
	})
}
