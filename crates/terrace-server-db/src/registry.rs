// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry artifacts: modules, providers and their immutable versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::error::{conflict_on_unique, DbError, Result};
use crate::row;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
	pub id: Uuid,
	pub organization_id: Option<Uuid>,
	pub namespace: String,
	pub name: String,
	pub system: String,
	pub created_at: DateTime<Utc>,
}

/// A published module artifact. Never updated once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
	pub id: Uuid,
	pub module_id: Uuid,
	pub version: String,
	pub storage_path: String,
	pub storage_backend: String,
	pub size_bytes: i64,
	pub checksum: String,
	pub source_tag: Option<String>,
	pub source_commit: Option<String>,
	pub link_id: Option<Uuid>,
	pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
	pub id: Uuid,
	pub organization_id: Option<Uuid>,
	pub namespace: String,
	pub name: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVersion {
	pub id: Uuid,
	pub provider_id: Uuid,
	pub version: String,
	pub protocols: Vec<String>,
	pub gpg_key_id: Option<String>,
	pub gpg_ascii_armor: Option<String>,
	pub shasums_url: Option<String>,
	pub shasums_signature_url: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPlatform {
	pub id: Uuid,
	pub provider_version_id: Uuid,
	pub os: String,
	pub arch: String,
	pub filename: String,
	pub storage_path: String,
	pub storage_backend: String,
	pub size_bytes: i64,
	pub sha256: String,
	pub h1_hash: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ModuleStore: Send + Sync {
	async fn get_module(&self, id: Uuid) -> Result<Option<Module>>;
	async fn create_module(&self, module: &Module) -> Result<()>;
	async fn get_version(&self, module_id: Uuid, version: &str) -> Result<Option<ModuleVersion>>;
	/// Fails with [`DbError::Conflict`] if the (module, version) pair exists.
	async fn create_version(&self, version: &ModuleVersion) -> Result<()>;
	/// Versions that recorded the tag and commit they were published from.
	async fn list_versions_with_source(&self) -> Result<Vec<ModuleVersion>>;
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
	async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>>;
	async fn get_or_create_provider(&self, namespace: &str, name: &str) -> Result<Provider>;
	async fn get_provider_version(&self, provider_id: Uuid, version: &str) -> Result<Option<ProviderVersion>>;
	async fn create_provider_version(&self, version: &ProviderVersion) -> Result<()>;
	async fn get_platform(&self, provider_version_id: Uuid, os: &str, arch: &str) -> Result<Option<ProviderPlatform>>;
	async fn create_platform(&self, platform: &ProviderPlatform) -> Result<()>;
	async fn list_platforms(&self, provider_version_id: Uuid) -> Result<Vec<ProviderPlatform>>;
}

#[derive(Clone)]
pub struct RegistryRepository {
	pool: SqlitePool,
}

impl RegistryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Modules
	// =========================================================================

	#[tracing::instrument(skip(self), fields(module_id = %id))]
	pub async fn get_module(&self, id: Uuid) -> Result<Option<Module>> {
		let row = sqlx::query(
			"SELECT id, organization_id, namespace, name, system, created_at FROM modules WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_module(&r)).transpose()
	}

	#[tracing::instrument(skip(self, module), fields(module_id = %module.id, namespace = %module.namespace, name = %module.name))]
	pub async fn create_module(&self, module: &Module) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO modules (id, organization_id, namespace, name, system, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(module.id.to_string())
		.bind(module.organization_id.map(|id| id.to_string()))
		.bind(&module.namespace)
		.bind(&module.name)
		.bind(&module.system)
		.bind(row::ts(&module.created_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique("Module already exists"))?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(module_id = %module_id, version = %version))]
	pub async fn get_version(&self, module_id: Uuid, version: &str) -> Result<Option<ModuleVersion>> {
		let row = sqlx::query(
			r#"
			SELECT id, module_id, version, storage_path, storage_backend, size_bytes, checksum,
				source_tag, source_commit, link_id, published_at
			FROM module_versions
			WHERE module_id = ? AND version = ?
			"#,
		)
		.bind(module_id.to_string())
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_module_version(&r)).transpose()
	}

	#[tracing::instrument(skip(self, v), fields(module_id = %v.module_id, version = %v.version))]
	pub async fn create_version(&self, v: &ModuleVersion) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO module_versions (id, module_id, version, storage_path, storage_backend, size_bytes,
				checksum, source_tag, source_commit, link_id, published_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(v.id.to_string())
		.bind(v.module_id.to_string())
		.bind(&v.version)
		.bind(&v.storage_path)
		.bind(&v.storage_backend)
		.bind(v.size_bytes)
		.bind(&v.checksum)
		.bind(&v.source_tag)
		.bind(&v.source_commit)
		.bind(v.link_id.map(|id| id.to_string()))
		.bind(row::ts(&v.published_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique(format!("version {} already exists", v.version)))?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_versions_with_source(&self) -> Result<Vec<ModuleVersion>> {
		let rows = sqlx::query(
			r#"
			SELECT id, module_id, version, storage_path, storage_backend, size_bytes, checksum,
				source_tag, source_commit, link_id, published_at
			FROM module_versions
			WHERE source_tag IS NOT NULL AND source_commit IS NOT NULL
			ORDER BY published_at ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_module_version).collect()
	}

	// =========================================================================
	// Providers
	// =========================================================================

	#[tracing::instrument(skip(self), fields(provider_id = %id))]
	pub async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>> {
		let row = sqlx::query(
			"SELECT id, organization_id, namespace, name, created_at FROM providers WHERE id = ?",
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_provider(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_or_create_provider(&self, namespace: &str, name: &str) -> Result<Provider> {
		sqlx::query(
			r#"
			INSERT INTO providers (id, organization_id, namespace, name, created_at)
			VALUES (?, NULL, ?, ?, ?)
			ON CONFLICT(namespace, name) DO NOTHING
			"#,
		)
		.bind(Uuid::new_v4().to_string())
		.bind(namespace)
		.bind(name)
		.bind(row::ts(&Utc::now()))
		.execute(&self.pool)
		.await?;

		let row = sqlx::query(
			"SELECT id, organization_id, namespace, name, created_at FROM providers WHERE namespace = ? AND name = ?",
		)
		.bind(namespace)
		.bind(name)
		.fetch_one(&self.pool)
		.await?;

		row_to_provider(&row)
	}

	#[tracing::instrument(skip(self), fields(provider_id = %provider_id, version = %version))]
	pub async fn get_provider_version(
		&self,
		provider_id: Uuid,
		version: &str,
	) -> Result<Option<ProviderVersion>> {
		let row = sqlx::query(
			r#"
			SELECT id, provider_id, version, protocols, gpg_key_id, gpg_ascii_armor, shasums_url,
				shasums_signature_url, created_at
			FROM provider_versions
			WHERE provider_id = ? AND version = ?
			"#,
		)
		.bind(provider_id.to_string())
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_provider_version(&r)).transpose()
	}

	#[tracing::instrument(skip(self, v), fields(provider_id = %v.provider_id, version = %v.version))]
	pub async fn create_provider_version(&self, v: &ProviderVersion) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO provider_versions (id, provider_id, version, protocols, gpg_key_id, gpg_ascii_armor,
				shasums_url, shasums_signature_url, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(v.id.to_string())
		.bind(v.provider_id.to_string())
		.bind(&v.version)
		.bind(serde_json::to_string(&v.protocols)?)
		.bind(&v.gpg_key_id)
		.bind(&v.gpg_ascii_armor)
		.bind(&v.shasums_url)
		.bind(&v.shasums_signature_url)
		.bind(row::ts(&v.created_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique(format!("provider version {} already exists", v.version)))?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(provider_version_id = %provider_version_id, os = %os, arch = %arch))]
	pub async fn get_platform(
		&self,
		provider_version_id: Uuid,
		os: &str,
		arch: &str,
	) -> Result<Option<ProviderPlatform>> {
		let row = sqlx::query(
			r#"
			SELECT id, provider_version_id, os, arch, filename, storage_path, storage_backend, size_bytes,
				sha256, h1_hash, created_at
			FROM provider_platforms
			WHERE provider_version_id = ? AND os = ? AND arch = ?
			"#,
		)
		.bind(provider_version_id.to_string())
		.bind(os)
		.bind(arch)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_platform(&r)).transpose()
	}

	#[tracing::instrument(skip(self, p), fields(provider_version_id = %p.provider_version_id, os = %p.os, arch = %p.arch))]
	pub async fn create_platform(&self, p: &ProviderPlatform) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO provider_platforms (id, provider_version_id, os, arch, filename, storage_path,
				storage_backend, size_bytes, sha256, h1_hash, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(p.id.to_string())
		.bind(p.provider_version_id.to_string())
		.bind(&p.os)
		.bind(&p.arch)
		.bind(&p.filename)
		.bind(&p.storage_path)
		.bind(&p.storage_backend)
		.bind(p.size_bytes)
		.bind(&p.sha256)
		.bind(&p.h1_hash)
		.bind(row::ts(&p.created_at))
		.execute(&self.pool)
		.await
		.map_err(conflict_on_unique(format!("platform {}/{} already exists", p.os, p.arch)))?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(provider_version_id = %provider_version_id))]
	pub async fn list_platforms(&self, provider_version_id: Uuid) -> Result<Vec<ProviderPlatform>> {
		let rows = sqlx::query(
			r#"
			SELECT id, provider_version_id, os, arch, filename, storage_path, storage_backend, size_bytes,
				sha256, h1_hash, created_at
			FROM provider_platforms
			WHERE provider_version_id = ?
			ORDER BY os, arch
			"#,
		)
		.bind(provider_version_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_platform).collect()
	}
}

#[async_trait]
impl ModuleStore for RegistryRepository {
	async fn get_module(&self, id: Uuid) -> Result<Option<Module>> {
		RegistryRepository::get_module(self, id).await
	}

	async fn create_module(&self, module: &Module) -> Result<()> {
		RegistryRepository::create_module(self, module).await
	}

	async fn get_version(&self, module_id: Uuid, version: &str) -> Result<Option<ModuleVersion>> {
		RegistryRepository::get_version(self, module_id, version).await
	}

	async fn create_version(&self, version: &ModuleVersion) -> Result<()> {
		RegistryRepository::create_version(self, version).await
	}

	async fn list_versions_with_source(&self) -> Result<Vec<ModuleVersion>> {
		RegistryRepository::list_versions_with_source(self).await
	}
}

#[async_trait]
impl ProviderStore for RegistryRepository {
	async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>> {
		RegistryRepository::get_provider(self, id).await
	}

	async fn get_or_create_provider(&self, namespace: &str, name: &str) -> Result<Provider> {
		RegistryRepository::get_or_create_provider(self, namespace, name).await
	}

	async fn get_provider_version(&self, provider_id: Uuid, version: &str) -> Result<Option<ProviderVersion>> {
		RegistryRepository::get_provider_version(self, provider_id, version).await
	}

	async fn create_provider_version(&self, version: &ProviderVersion) -> Result<()> {
		RegistryRepository::create_provider_version(self, version).await
	}

	async fn get_platform(&self, provider_version_id: Uuid, os: &str, arch: &str) -> Result<Option<ProviderPlatform>> {
		RegistryRepository::get_platform(self, provider_version_id, os, arch).await
	}

	async fn create_platform(&self, platform: &ProviderPlatform) -> Result<()> {
		RegistryRepository::create_platform(self, platform).await
	}

	async fn list_platforms(&self, provider_version_id: Uuid) -> Result<Vec<ProviderPlatform>> {
		RegistryRepository::list_platforms(self, provider_version_id).await
	}
}

fn row_to_module(r: &SqliteRow) -> Result<Module> {
	Ok(Module {
		id: row::uuid(r, "id")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		namespace: r.try_get("namespace")?,
		name: r.try_get("name")?,
		system: r.try_get("system")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_module_version(r: &SqliteRow) -> Result<ModuleVersion> {
	Ok(ModuleVersion {
		id: row::uuid(r, "id")?,
		module_id: row::uuid(r, "module_id")?,
		version: r.try_get("version")?,
		storage_path: r.try_get("storage_path")?,
		storage_backend: r.try_get("storage_backend")?,
		size_bytes: r.try_get("size_bytes")?,
		checksum: r.try_get("checksum")?,
		source_tag: r.try_get("source_tag")?,
		source_commit: r.try_get("source_commit")?,
		link_id: row::opt_uuid(r, "link_id")?,
		published_at: row::timestamp(r, "published_at")?,
	})
}

fn row_to_provider(r: &SqliteRow) -> Result<Provider> {
	Ok(Provider {
		id: row::uuid(r, "id")?,
		organization_id: row::opt_uuid(r, "organization_id")?,
		namespace: r.try_get("namespace")?,
		name: r.try_get("name")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_provider_version(r: &SqliteRow) -> Result<ProviderVersion> {
	Ok(ProviderVersion {
		id: row::uuid(r, "id")?,
		provider_id: row::uuid(r, "provider_id")?,
		version: r.try_get("version")?,
		protocols: row::string_list(r, "protocols")?,
		gpg_key_id: r.try_get("gpg_key_id")?,
		gpg_ascii_armor: r.try_get("gpg_ascii_armor")?,
		shasums_url: r.try_get("shasums_url")?,
		shasums_signature_url: r.try_get("shasums_signature_url")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

fn row_to_platform(r: &SqliteRow) -> Result<ProviderPlatform> {
	Ok(ProviderPlatform {
		id: row::uuid(r, "id")?,
		provider_version_id: row::uuid(r, "provider_version_id")?,
		os: r.try_get("os")?,
		arch: r.try_get("arch")?,
		filename: r.try_get("filename")?,
		storage_path: r.try_get("storage_path")?,
		storage_backend: r.try_get("storage_backend")?,
		size_bytes: r.try_get("size_bytes")?,
		sha256: r.try_get("sha256")?,
		h1_hash: r.try_get("h1_hash")?,
		created_at: row::timestamp(r, "created_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, make_module};

	fn make_version(module_id: Uuid, version: &str) -> ModuleVersion {
		ModuleVersion {
			id: Uuid::new_v4(),
			module_id,
			version: version.to_string(),
			storage_path: format!("modules/acme/vpc/aws/{version}.tar.gz"),
			storage_backend: "local".to_string(),
			size_bytes: 1024,
			checksum: "ab".repeat(32),
			source_tag: Some(format!("v{version}")),
			source_commit: Some("a".repeat(40)),
			link_id: None,
			published_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_create_version_conflicts_on_duplicate() {
		let repo = RegistryRepository::new(create_test_pool().await);
		let module = make_module("acme", "vpc", "aws");
		repo.create_module(&module).await.unwrap();

		repo.create_version(&make_version(module.id, "1.2.3")).await.unwrap();
		let err = repo
			.create_version(&make_version(module.id, "1.2.3"))
			.await
			.unwrap_err();
		assert!(err.is_conflict());

		let stored = repo.get_version(module.id, "1.2.3").await.unwrap().unwrap();
		assert_eq!(stored.source_tag.as_deref(), Some("v1.2.3"));
	}

	#[tokio::test]
	async fn test_list_versions_with_source_skips_manual_uploads() {
		let repo = RegistryRepository::new(create_test_pool().await);
		let module = make_module("acme", "vpc", "aws");
		repo.create_module(&module).await.unwrap();

		repo.create_version(&make_version(module.id, "1.0.0")).await.unwrap();
		let manual = ModuleVersion {
			source_tag: None,
			source_commit: None,
			..make_version(module.id, "1.1.0")
		};
		repo.create_version(&manual).await.unwrap();

		let versions = repo.list_versions_with_source().await.unwrap();
		assert_eq!(versions.len(), 1);
		assert_eq!(versions[0].version, "1.0.0");
	}

	#[tokio::test]
	async fn test_get_or_create_provider_is_stable() {
		let repo = RegistryRepository::new(create_test_pool().await);

		let first = repo.get_or_create_provider("hashicorp", "aws").await.unwrap();
		let second = repo.get_or_create_provider("hashicorp", "aws").await.unwrap();
		assert_eq!(first.id, second.id);
	}

	#[tokio::test]
	async fn test_provider_version_and_platforms() {
		let repo = RegistryRepository::new(create_test_pool().await);
		let provider = repo.get_or_create_provider("hashicorp", "aws").await.unwrap();

		let version = ProviderVersion {
			id: Uuid::new_v4(),
			provider_id: provider.id,
			version: "5.0.0".to_string(),
			protocols: vec!["5.0".to_string()],
			gpg_key_id: Some("34365D9472D7468F".to_string()),
			gpg_ascii_armor: None,
			shasums_url: None,
			shasums_signature_url: None,
			created_at: Utc::now(),
		};
		repo.create_provider_version(&version).await.unwrap();
		assert!(repo
			.create_provider_version(&ProviderVersion {
				id: Uuid::new_v4(),
				..version.clone()
			})
			.await
			.unwrap_err()
			.is_conflict());

		let platform = ProviderPlatform {
			id: Uuid::new_v4(),
			provider_version_id: version.id,
			os: "linux".to_string(),
			arch: "amd64".to_string(),
			filename: "terraform-provider-aws_5.0.0_linux_amd64.zip".to_string(),
			storage_path: "providers/hashicorp/aws/5.0.0/linux_amd64.zip".to_string(),
			storage_backend: "local".to_string(),
			size_bytes: 42,
			sha256: "cd".repeat(32),
			h1_hash: Some("h1:abc=".to_string()),
			created_at: Utc::now(),
		};
		repo.create_platform(&platform).await.unwrap();

		let stored = repo
			.get_platform(version.id, "linux", "amd64")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.sha256, platform.sha256);
		assert_eq!(repo.list_platforms(version.id).await.unwrap().len(), 1);

		let stored_version = repo
			.get_provider_version(provider.id, "5.0.0")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored_version.protocols, vec!["5.0"]);
	}
}
