// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::error::{conflict_on_unique, DbError, Result};
use crate::row;

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmKind {
	GitHub,
	GitLab,
	AzureDevOps,
	BitbucketDc,
}

impl ScmKind {
	pub const ALL: [ScmKind; 4] = [
		ScmKind::GitHub,
		ScmKind::GitLab,
		ScmKind::AzureDevOps,
		ScmKind::BitbucketDc,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ScmKind::GitHub => "github",
			ScmKind::GitLab => "gitlab",
			ScmKind::AzureDevOps => "azure_devops",
			ScmKind::BitbucketDc => "bitbucket_dc",
		}
	}
}

impl std::fmt::Display for ScmKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ScmKind {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"github" => Ok(ScmKind::GitHub),
			"gitlab" => Ok(ScmKind::GitLab),
			"azure_devops" | "azuredevops" => Ok(ScmKind::AzureDevOps),
			"bitbucket_dc" | "bitbucket" => Ok(ScmKind::BitbucketDc),
			_ => Err(format!("unknown scm kind: {s}")),
		}
	}
}

/// A configured source-control integration. Secrets are stored sealed.
#[derive(Clone, Serialize, Deserialize)]
pub struct ScmProviderConfig {
	pub id: Uuid,
	pub organization_id: Option<Uuid>,
	pub name: String,
	pub kind: ScmKind,
	/// Set for self-hosted instances.
	pub base_url: Option<String>,
	/// Entra tenant, Azure DevOps only.
	pub tenant_id: Option<String>,
	pub client_id: String,
	#[serde(skip_serializing)]
	pub client_secret_sealed: String,
	#[serde(skip_serializing)]
	pub webhook_secret_sealed: Option<String>,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ScmProviderConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScmProviderConfig")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("kind", &self.kind)
			.field("base_url", &self.base_url)
			.field("tenant_id", &self.tenant_id)
			.field("client_id", &self.client_id)
			.field("client_secret_sealed", &REDACTED)
			.field("webhook_secret_sealed", &self.webhook_secret_sealed.as_ref().map(|_| REDACTED))
			.field("is_active", &self.is_active)
			.finish()
	}
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokenRecord {
	pub id: Uuid,
	pub user_id: Uuid,
	pub provider_id: Uuid,
	#[serde(skip_serializing)]
	pub access_token_sealed: String,
	#[serde(skip_serializing)]
	pub refresh_token_sealed: Option<String>,
	pub token_type: String,
	pub scopes: Vec<String>,
	pub expires_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl OAuthTokenRecord {
	/// Expired, or expiring within `skew`.
	pub fn is_expired(&self, skew: chrono::Duration) -> bool {
		self
			.expires_at
			.map(|at| at <= Utc::now() + skew)
			.unwrap_or(false)
	}
}

impl std::fmt::Debug for OAuthTokenRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OAuthTokenRecord")
			.field("id", &self.id)
			.field("user_id", &self.user_id)
			.field("provider_id", &self.provider_id)
			.field("access_token_sealed", &REDACTED)
			.field("token_type", &self.token_type)
			.field("scopes", &self.scopes)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Binds one registry module to one external repository.
#[derive(Clone, Serialize, Deserialize)]
pub struct RepositoryLink {
	pub id: Uuid,
	pub module_id: Uuid,
	pub provider_id: Uuid,
	pub owner: String,
	pub repo_name: String,
	pub default_branch: String,
	/// Subdirectory holding the module, empty for the repository root.
	pub module_path: String,
	pub tag_pattern: String,
	pub auto_publish: bool,
	pub webhook_id: Option<String>,
	#[serde(skip_serializing)]
	pub webhook_secret_sealed: Option<String>,
	#[serde(skip_serializing)]
	pub webhook_url: Option<String>,
	pub webhook_enabled: bool,
	pub last_synced_commit: Option<String>,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub created_by: Option<Uuid>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for RepositoryLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// webhook_url embeds the delivery secret
		f.debug_struct("RepositoryLink")
			.field("id", &self.id)
			.field("module_id", &self.module_id)
			.field("provider_id", &self.provider_id)
			.field("owner", &self.owner)
			.field("repo_name", &self.repo_name)
			.field("module_path", &self.module_path)
			.field("tag_pattern", &self.tag_pattern)
			.field("auto_publish", &self.auto_publish)
			.field("webhook_id", &self.webhook_id)
			.field("webhook_enabled", &self.webhook_enabled)
			.field("last_synced_commit", &self.last_synced_commit)
			.finish_non_exhaustive()
	}
}

/// Webhook fields written when a hook is registered or removed.
#[derive(Clone, Default)]
pub struct LinkWebhookUpdate {
	pub webhook_id: Option<String>,
	pub webhook_secret_sealed: Option<String>,
	pub webhook_url: Option<String>,
	pub webhook_enabled: bool,
}

#[async_trait]
pub trait ScmProviderStore: Send + Sync {
	async fn get_provider(&self, id: Uuid) -> Result<Option<ScmProviderConfig>>;
	async fn create_provider(&self, provider: &ScmProviderConfig) -> Result<()>;
	async fn list_active_providers(&self) -> Result<Vec<ScmProviderConfig>>;
}

#[async_trait]
pub trait OAuthTokenStore: Send + Sync {
	async fn get_token(&self, user_id: Uuid, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>>;
	/// Most recently refreshed token for the provider, used by background jobs.
	async fn get_any_token_for_provider(&self, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>>;
	async fn upsert_token(&self, token: &OAuthTokenRecord) -> Result<()>;
}

#[async_trait]
pub trait RepositoryLinkStore: Send + Sync {
	async fn get_link(&self, id: Uuid) -> Result<Option<RepositoryLink>>;
	async fn get_link_by_module(&self, module_id: Uuid) -> Result<Option<RepositoryLink>>;
	/// Fails with [`DbError::Conflict`] if the module is already linked.
	async fn create_link(&self, link: &RepositoryLink) -> Result<()>;
	async fn update_link_webhook(&self, id: Uuid, update: &LinkWebhookUpdate) -> Result<()>;
	async fn update_link_last_synced(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> Result<()>;
	async fn list_links(&self) -> Result<Vec<RepositoryLink>>;
}

#[derive(Clone)]
pub struct ScmRepository {
	pool: SqlitePool,
}

const LINK_COLUMNS: &str = "id, module_id, provider_id, owner, repo_name, default_branch, module_path, tag_pattern, auto_publish, webhook_id, webhook_secret_sealed, webhook_url, webhook_enabled, last_synced_commit, last_synced_at, created_by, created_at, updated_at";

const TOKEN_COLUMNS: &str = "id, user_id, provider_id, access_token_sealed, refresh_token_sealed, token_type, scopes, expires_at, created_at, updated_at";

impl ScmRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Provider configs
	// =========================================================================

	#[tracing::instrument(skip(self), fields(provider_id = %id))]
	pub async fn get_provider(&self, id: Uuid) -> Result<Option<ScmProviderConfig>> {
		let row = sqlx::query(
			r#"
			SELECT id, organization_id, name, kind, base_url, tenant_id, client_id, client_secret_sealed,
				webhook_secret_sealed, is_active, created_at, updated_at
			FROM scm_providers
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_provider(&r)).transpose()
	}

	#[tracing::instrument(skip(self, p), fields(provider_id = %p.id, kind = %p.kind))]
	pub async fn create_provider(&self, p: &ScmProviderConfig) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO scm_providers (id, organization_id, name, kind, base_url, tenant_id, client_id,
				client_secret_sealed, webhook_secret_sealed, is_active, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(p.id.to_string())
		.bind(p.organization_id.map(|id| id.to_string()))
		.bind(&p.name)
		.bind(p.kind.as_str())
		.bind(&p.base_url)
		.bind(&p.tenant_id)
		.bind(&p.client_id)
		.bind(&p.client_secret_sealed)
		.bind(&p.webhook_secret_sealed)
		.bind(p.is_active)
		.bind(row::ts(&p.created_at))
		.bind(row::ts(&p.updated_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique("SCM provider already exists"))?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_active_providers(&self) -> Result<Vec<ScmProviderConfig>> {
		let rows = sqlx::query(
			r#"
			SELECT id, organization_id, name, kind, base_url, tenant_id, client_id, client_secret_sealed,
				webhook_secret_sealed, is_active, created_at, updated_at
			FROM scm_providers
			WHERE is_active = 1
			ORDER BY name
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_provider).collect()
	}

	// =========================================================================
	// OAuth tokens
	// =========================================================================

	#[tracing::instrument(skip(self), fields(user_id = %user_id, provider_id = %provider_id))]
	pub async fn get_token(&self, user_id: Uuid, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {TOKEN_COLUMNS} FROM scm_oauth_tokens WHERE user_id = ? AND provider_id = ?"
		))
		.bind(user_id.to_string())
		.bind(provider_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_token(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(provider_id = %provider_id))]
	pub async fn get_any_token_for_provider(&self, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {TOKEN_COLUMNS} FROM scm_oauth_tokens WHERE provider_id = ? ORDER BY updated_at DESC LIMIT 1"
		))
		.bind(provider_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_token(&r)).transpose()
	}

	#[tracing::instrument(skip(self, t), fields(user_id = %t.user_id, provider_id = %t.provider_id))]
	pub async fn upsert_token(&self, t: &OAuthTokenRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO scm_oauth_tokens (id, user_id, provider_id, access_token_sealed, refresh_token_sealed,
				token_type, scopes, expires_at, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(user_id, provider_id) DO UPDATE SET
				access_token_sealed = excluded.access_token_sealed,
				refresh_token_sealed = excluded.refresh_token_sealed,
				token_type = excluded.token_type,
				scopes = excluded.scopes,
				expires_at = excluded.expires_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(t.id.to_string())
		.bind(t.user_id.to_string())
		.bind(t.provider_id.to_string())
		.bind(&t.access_token_sealed)
		.bind(&t.refresh_token_sealed)
		.bind(&t.token_type)
		.bind(serde_json::to_string(&t.scopes)?)
		.bind(row::opt_ts(&t.expires_at))
		.bind(row::ts(&t.created_at))
		.bind(row::ts(&t.updated_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	// =========================================================================
	// Repository links
	// =========================================================================

	#[tracing::instrument(skip(self), fields(link_id = %id))]
	pub async fn get_link(&self, id: Uuid) -> Result<Option<RepositoryLink>> {
		let row = sqlx::query(&format!("SELECT {LINK_COLUMNS} FROM repository_links WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| row_to_link(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(module_id = %module_id))]
	pub async fn get_link_by_module(&self, module_id: Uuid) -> Result<Option<RepositoryLink>> {
		let row = sqlx::query(&format!(
			"SELECT {LINK_COLUMNS} FROM repository_links WHERE module_id = ?"
		))
		.bind(module_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_link(&r)).transpose()
	}

	#[tracing::instrument(skip(self, l), fields(link_id = %l.id, module_id = %l.module_id))]
	pub async fn create_link(&self, l: &RepositoryLink) -> Result<()> {
		sqlx::query(&format!(
			"INSERT INTO repository_links ({LINK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(l.id.to_string())
		.bind(l.module_id.to_string())
		.bind(l.provider_id.to_string())
		.bind(&l.owner)
		.bind(&l.repo_name)
		.bind(&l.default_branch)
		.bind(&l.module_path)
		.bind(&l.tag_pattern)
		.bind(l.auto_publish)
		.bind(&l.webhook_id)
		.bind(&l.webhook_secret_sealed)
		.bind(&l.webhook_url)
		.bind(l.webhook_enabled)
		.bind(&l.last_synced_commit)
		.bind(row::opt_ts(&l.last_synced_at))
		.bind(l.created_by.map(|id| id.to_string()))
		.bind(row::ts(&l.created_at))
		.bind(row::ts(&l.updated_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique("Module is already linked to a repository"))?;

		Ok(())
	}

	#[tracing::instrument(skip(self, update), fields(link_id = %id, enabled = update.webhook_enabled))]
	pub async fn update_link_webhook(&self, id: Uuid, update: &LinkWebhookUpdate) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE repository_links
			SET webhook_id = ?, webhook_secret_sealed = ?, webhook_url = ?, webhook_enabled = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&update.webhook_id)
		.bind(&update.webhook_secret_sealed)
		.bind(&update.webhook_url)
		.bind(update.webhook_enabled)
		.bind(row::ts(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("repository link {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(link_id = %id))]
	pub async fn update_link_last_synced(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> Result<()> {
		let result = sqlx::query(
			"UPDATE repository_links SET last_synced_commit = ?, last_synced_at = ?, updated_at = ? WHERE id = ?",
		)
		.bind(commit)
		.bind(row::ts(&at))
		.bind(row::ts(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("repository link {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_links(&self) -> Result<Vec<RepositoryLink>> {
		let rows = sqlx::query(&format!(
			"SELECT {LINK_COLUMNS} FROM repository_links ORDER BY created_at"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_link).collect()
	}
}

#[async_trait]
impl ScmProviderStore for ScmRepository {
	async fn get_provider(&self, id: Uuid) -> Result<Option<ScmProviderConfig>> {
		ScmRepository::get_provider(self, id).await
	}

	async fn create_provider(&self, provider: &ScmProviderConfig) -> Result<()> {
		ScmRepository::create_provider(self, provider).await
	}

	async fn list_active_providers(&self) -> Result<Vec<ScmProviderConfig>> {
		ScmRepository::list_active_providers(self).await
	}
}

#[async_trait]
impl OAuthTokenStore for ScmRepository {
	async fn get_token(&self, user_id: Uuid, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
		ScmRepository::get_token(self, user_id, provider_id).await
	}

	async fn get_any_token_for_provider(&self, provider_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
		ScmRepository::get_any_token_for_provider(self, provider_id).await
	}

	async fn upsert_token(&self, token: &OAuthTokenRecord) -> Result<()> {
		ScmRepository::upsert_token(self, token).await
	}
}

#[async_trait]
impl RepositoryLinkStore for ScmRepository {
	async fn get_link(&self, id: Uuid) -> Result<Option<RepositoryLink>> {
		ScmRepository::get_link(self, id).await
	}

	async fn get_link_by_module(&self, module_id: Uuid) -> Result<Option<RepositoryLink>> {
		ScmRepository::get_link_by_module(self, module_id).await
	}

	async fn create_link(&self, link: &RepositoryLink) -> Result<()> {
		ScmRepository::create_link(self, link).await
	}

	async fn update_link_webhook(&self, id: Uuid, update: &LinkWebhookUpdate) -> Result<()> {
		ScmRepository::update_link_webhook(self, id, update).await
	}

	async fn update_link_last_synced(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> Result<()> {
		ScmRepository::update_link_last_synced(self, id, commit, at).await
	}

	async fn list_links(&self) -> Result<Vec<RepositoryLink>> {
		ScmRepository::list_links(self).await
	}
}

fn row_to_provider(r: &SqliteRow) -> Result<ScmProviderConfig> {
	Ok(ScmProviderConfig {
		id: row::uuid(r, "id")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		name: r.try_get("name")?,
		kind: row::enum_column(r, "kind")?,
		base_url: r.try_get("base_url")?,
		tenant_id: r.try_get("tenant_id")?,
		client_id: r.try_get("client_id")?,
		client_secret_sealed: r.try_get("client_secret_sealed")?,
		webhook_secret_sealed: r.try_get("webhook_secret_sealed")?,
		is_active: row::flag(r, "is_active")?,
		created_at: row::timestamp(r, "created_at")?,
		updated_at: row::timestamp(r, "updated_at")?,
	})
}

fn row_to_token(r: &SqliteRow) -> Result<OAuthTokenRecord> {
	Ok(OAuthTokenRecord {
		id: row::uuid(r, "id")?,
		user_id: row::uuid(r, "user_id")?,
		provider_id: row::uuid(r, "provider_id")?,
		access_token_sealed: r.try_get("access_token_sealed")?,
		refresh_token_sealed: r.try_get("refresh_token_sealed")?,
		token_type: r.try_get("token_type")?,
		scopes: row::string_list(r, "scopes")?,
		expires_at: row::opt_timestamp(r, "expires_at")?,
		created_at: row::timestamp(r, "created_at")?,
		updated_at: row::timestamp(r, "updated_at")?,
	})
}

fn row_to_link(r: &SqliteRow) -> Result<RepositoryLink> {
	Ok(RepositoryLink {
		id: row::uuid(r, "id")?,
		module_id: row::uuid(r, "module_id")?,
		provider_id: row::uuid(r, "provider_id")?,
		owner: r.try_get("owner")?,
		repo_name: r.try_get("repo_name")?,
		default_branch: r.try_get("default_branch")?,
		module_path: r.try_get("module_path")?,
		tag_pattern: r.try_get("tag_pattern")?,
		auto_publish: row::flag(r, "auto_publish")?,
		webhook_id: r.try_get("webhook_id")?,
		webhook_secret_sealed: r.try_get("webhook_secret_sealed")?,
		webhook_url: r.try_get("webhook_url")?,
		webhook_enabled: row::flag(r, "webhook_enabled")?,
		last_synced_commit: r.try_get("last_synced_commit")?,
		last_synced_at: row::opt_timestamp(r, "last_synced_at")?,
		created_by: row::opt_uuid(r, "created_by")?,
		created_at: row::timestamp(r, "created_at")?,
		updated_at: row::timestamp(r, "updated_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::RegistryRepository;
	use crate::testing::{create_test_pool, make_link, make_module, seed_link};

	#[test]
	fn test_scm_kind_roundtrip() {
		for kind in ScmKind::ALL {
			assert_eq!(kind.as_str().parse::<ScmKind>().unwrap(), kind);
		}
		assert!("svn".parse::<ScmKind>().is_err());
	}

	#[test]
	fn test_debug_redacts_sealed_fields() {
		let mut provider = crate::testing::make_provider_config(ScmKind::GitLab);
		provider.client_secret_sealed = "c2VhbGVkLWNpcGhlcnRleHQ=".to_string();
		let debug = format!("{provider:?}");
		assert!(!debug.contains("c2VhbGVkLWNpcGhlcnRleHQ="));
		assert!(debug.contains("[REDACTED]"));
	}

	#[tokio::test]
	async fn test_second_link_for_module_conflicts() {
		let pool = create_test_pool().await;
		let (module, provider, _) = seed_link(&pool).await;
		let repo = ScmRepository::new(pool);

		let err = repo
			.create_link(&make_link(module.id, provider.id))
			.await
			.unwrap_err();
		assert!(err.is_conflict());
	}

	#[tokio::test]
	async fn test_update_link_webhook_and_last_synced() {
		let pool = create_test_pool().await;
		let (_, _, link) = seed_link(&pool).await;
		let repo = ScmRepository::new(pool);

		repo
			.update_link_webhook(
				link.id,
				&LinkWebhookUpdate {
					webhook_id: Some("1234".to_string()),
					webhook_secret_sealed: Some("sealed".to_string()),
					webhook_url: Some("https://registry.example/webhooks/scm/x/y".to_string()),
					webhook_enabled: true,
				},
			)
			.await
			.unwrap();
		repo
			.update_link_last_synced(link.id, "deadbeef", Utc::now())
			.await
			.unwrap();

		let stored = repo.get_link(link.id).await.unwrap().unwrap();
		assert!(stored.webhook_enabled);
		assert_eq!(stored.webhook_id.as_deref(), Some("1234"));
		assert_eq!(stored.last_synced_commit.as_deref(), Some("deadbeef"));
		assert!(stored.last_synced_at.is_some());

		let missing = repo
			.update_link_last_synced(Uuid::new_v4(), "deadbeef", Utc::now())
			.await;
		assert!(matches!(missing, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_get_link_by_module() {
		let pool = create_test_pool().await;
		let (module, _, link) = seed_link(&pool).await;
		let registry = RegistryRepository::new(pool.clone());
		let other = make_module("acme", "dns", "aws");
		registry.create_module(&other).await.unwrap();
		let repo = ScmRepository::new(pool);

		assert_eq!(repo.get_link_by_module(module.id).await.unwrap().unwrap().id, link.id);
		assert!(repo.get_link_by_module(other.id).await.unwrap().is_none());
		assert_eq!(repo.list_links().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_upsert_token_replaces_existing() {
		let pool = create_test_pool().await;
		let (_, provider, _) = seed_link(&pool).await;
		let repo = ScmRepository::new(pool);
		let user_id = Uuid::new_v4();
		let now = Utc::now();

		let token = OAuthTokenRecord {
			id: Uuid::new_v4(),
			user_id,
			provider_id: provider.id,
			access_token_sealed: "first".to_string(),
			refresh_token_sealed: Some("refresh".to_string()),
			token_type: "bearer".to_string(),
			scopes: vec!["repo".to_string()],
			expires_at: Some(now - chrono::Duration::minutes(1)),
			created_at: now,
			updated_at: now,
		};
		repo.upsert_token(&token).await.unwrap();
		repo
			.upsert_token(&OAuthTokenRecord {
				id: Uuid::new_v4(),
				access_token_sealed: "second".to_string(),
				expires_at: Some(now + chrono::Duration::hours(1)),
				..token.clone()
			})
			.await
			.unwrap();

		let stored = repo.get_token(user_id, provider.id).await.unwrap().unwrap();
		assert_eq!(stored.access_token_sealed, "second");
		assert_eq!(stored.id, token.id);
		assert!(!stored.is_expired(chrono::Duration::zero()));
		assert!(repo
			.get_any_token_for_provider(provider.id)
			.await
			.unwrap()
			.is_some());
	}
}
