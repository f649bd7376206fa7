// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory database helpers for tests across the workspace.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use uuid::Uuid;

use crate::mirror::MirrorConfig;
use crate::registry::{Module, RegistryRepository};
use crate::scm::{RepositoryLink, ScmKind, ScmProviderConfig, ScmRepository};

/// Single-connection in-memory pool with all migrations applied.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")
		.unwrap()
		.foreign_keys(true);
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.unwrap();
	crate::pool::run_migrations(&pool).await.unwrap();
	pool
}

pub fn make_module(namespace: &str, name: &str, system: &str) -> Module {
	Module {
		id: Uuid::new_v4(),
		organization_id: None,
		namespace: namespace.to_string(),
		name: name.to_string(),
		system: system.to_string(),
		created_at: Utc::now(),
	}
}

pub fn make_provider_config(kind: ScmKind) -> ScmProviderConfig {
	let now = Utc::now();
	ScmProviderConfig {
		id: Uuid::new_v4(),
		organization_id: None,
		name: format!("{} test", kind.as_str()),
		kind,
		base_url: None,
		tenant_id: None,
		client_id: "client-id".to_string(),
		client_secret_sealed: String::new(),
		webhook_secret_sealed: None,
		is_active: true,
		created_at: now,
		updated_at: now,
	}
}

pub fn make_link(module_id: Uuid, provider_id: Uuid) -> RepositoryLink {
	let now = Utc::now();
	RepositoryLink {
		id: Uuid::new_v4(),
		module_id,
		provider_id,
		owner: "acme".to_string(),
		repo_name: "terraform-aws-vpc".to_string(),
		default_branch: "main".to_string(),
		module_path: String::new(),
		tag_pattern: "v*".to_string(),
		auto_publish: true,
		webhook_id: None,
		webhook_secret_sealed: None,
		webhook_url: None,
		webhook_enabled: false,
		last_synced_commit: None,
		last_synced_at: None,
		created_by: None,
		created_at: now,
		updated_at: now,
	}
}

/// Insert a module, a GitHub provider config and a link between them.
pub async fn seed_link(pool: &SqlitePool) -> (Module, ScmProviderConfig, RepositoryLink) {
	let registry = RegistryRepository::new(pool.clone());
	let scm = ScmRepository::new(pool.clone());

	let module = make_module("acme", "vpc", "aws");
	registry.create_module(&module).await.unwrap();
	let provider = make_provider_config(ScmKind::GitHub);
	scm.create_provider(&provider).await.unwrap();
	let link = make_link(module.id, provider.id);
	scm.create_link(&link).await.unwrap();

	(module, provider, link)
}

pub fn make_mirror_config(name: &str) -> MirrorConfig {
	let now = Utc::now();
	MirrorConfig {
		id: Uuid::new_v4(),
		name: name.to_string(),
		description: None,
		upstream_url: "https://registry.terraform.io".to_string(),
		organization_id: None,
		namespace_filter: Vec::new(),
		provider_filter: Vec::new(),
		version_filter: None,
		platform_filter: Vec::new(),
		enabled: true,
		sync_interval_hours: 24,
		requires_approval: false,
		last_sync_at: None,
		last_sync_status: None,
		last_sync_error: None,
		created_at: now,
		updated_at: now,
	}
}
