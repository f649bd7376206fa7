// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::Utc;
use terrace_common_secret::SecretString;
use terrace_server_crypto::CredentialCipher;
use terrace_server_db::{
	ModuleStore, OAuthTokenRecord, OAuthTokenStore, RepositoryLink, RepositoryLinkStore, ScmProviderConfig,
	ScmProviderStore, WebhookLogStore,
};
use terrace_server_scm::{AccessToken, ConnectorRegistry, ScmConnector};
use terrace_server_storage::Storage;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{PublishError, Result};

/// Tokens expiring within this window are refreshed before use.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Shared dependencies of webhook ingestion and publishing, built once at
/// startup and cloned into each component.
#[derive(Clone)]
pub struct IngestionContext {
	pub cipher: Arc<CredentialCipher>,
	pub connectors: Arc<ConnectorRegistry>,
	pub providers: Arc<dyn ScmProviderStore>,
	pub tokens: Arc<dyn OAuthTokenStore>,
	pub links: Arc<dyn RepositoryLinkStore>,
	pub logs: Arc<dyn WebhookLogStore>,
	pub modules: Arc<dyn ModuleStore>,
	pub storage: Arc<dyn Storage>,
}

impl IngestionContext {
	pub async fn link(&self, id: Uuid) -> Result<RepositoryLink> {
		self
			.links
			.get_link(id)
			.await?
			.ok_or_else(|| PublishError::NotFound(format!("repository link {id}")))
	}

	pub async fn provider(&self, id: Uuid) -> Result<ScmProviderConfig> {
		self
			.providers
			.get_provider(id)
			.await?
			.ok_or_else(|| PublishError::NotFound(format!("SCM provider {id}")))
	}

	pub fn open_secret(&self, sealed: &str, what: &'static str) -> Result<SecretString> {
		self
			.cipher
			.open_secret(sealed)
			.map_err(|e| PublishError::Credentials(format!("failed to open {what}: {e}")))
	}

	/// Build a connector for `provider`, opening its client secret.
	pub fn connector_for(&self, provider: &ScmProviderConfig) -> Result<Arc<dyn ScmConnector>> {
		let client_secret = self.open_secret(&provider.client_secret_sealed, "client secret")?;
		Ok(self.connectors.build_for(provider, client_secret)?)
	}

	/// Usable access token for acting on `link`'s repository.
	///
	/// Prefers the link creator's token. An expired token with a refresh
	/// token is renewed, re-sealed and stored before being returned.
	#[instrument(skip(self, link, provider, connector), fields(link_id = %link.id, provider_id = %provider.id))]
	pub async fn access_token_for(
		&self,
		link: &RepositoryLink,
		provider: &ScmProviderConfig,
		connector: &dyn ScmConnector,
	) -> Result<SecretString> {
		let mut record = None;
		if let Some(user_id) = link.created_by {
			record = self.tokens.get_token(user_id, provider.id).await?;
		}
		if record.is_none() {
			record = self.tokens.get_any_token_for_provider(provider.id).await?;
		}
		let record = record.ok_or_else(|| {
			PublishError::Credentials(format!("no OAuth token stored for SCM provider {}", provider.id))
		})?;

		if !record.is_expired(chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS)) {
			return self.open_secret(&record.access_token_sealed, "access token");
		}

		let Some(refresh_sealed) = record.refresh_token_sealed.as_deref().filter(|s| !s.is_empty()) else {
			return Err(PublishError::Credentials(
				"OAuth token expired and no refresh token is stored".to_string(),
			));
		};
		let refresh = self.open_secret(refresh_sealed, "refresh token")?;
		let renewed = connector.renew_token(&refresh).await?;

		let updated = self.reseal(&record, &renewed)?;
		self.tokens.upsert_token(&updated).await?;
		info!(user_id = %record.user_id, "renewed OAuth token");

		Ok(renewed.access)
	}

	fn reseal(&self, record: &OAuthTokenRecord, renewed: &AccessToken) -> Result<OAuthTokenRecord> {
		let seal = |plain: &str| {
			self
				.cipher
				.seal_str(plain)
				.map_err(|e| PublishError::Credentials(format!("failed to seal token: {e}")))
		};

		let refresh_token_sealed = match &renewed.refresh {
			Some(refresh) => Some(seal(refresh.expose())?),
			None => record.refresh_token_sealed.clone(),
		};

		Ok(OAuthTokenRecord {
			access_token_sealed: seal(renewed.access.expose())?,
			refresh_token_sealed,
			token_type: renewed.token_type.clone(),
			scopes: if renewed.scopes.is_empty() {
				record.scopes.clone()
			} else {
				renewed.scopes.clone()
			},
			expires_at: renewed.expires_at,
			updated_at: Utc::now(),
			..record.clone()
		})
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use terrace_server_db::testing::create_test_pool;
	use terrace_server_db::{DeliveryRepository, DeliveryState, RegistryRepository, ScmRepository, WebhookDeliveryLog};
	use terrace_server_scm::ConnectorDefaults;
	use terrace_server_storage::LocalStorage;

	pub(crate) const TEST_KEY: [u8; 32] = [7u8; 32];

	pub(crate) struct TestEnv {
		pub ctx: IngestionContext,
		pub pool: sqlx::SqlitePool,
		pub storage_root: tempfile::TempDir,
	}

	pub(crate) async fn test_env() -> TestEnv {
		let pool = create_test_pool().await;
		let scm = Arc::new(ScmRepository::new(pool.clone()));
		let storage_root = tempfile::tempdir().unwrap();
		let ctx = IngestionContext {
			cipher: Arc::new(CredentialCipher::new(&TEST_KEY).unwrap()),
			connectors: Arc::new(ConnectorRegistry::with_builtin(ConnectorDefaults::default())),
			providers: scm.clone(),
			tokens: scm.clone(),
			links: scm,
			logs: Arc::new(DeliveryRepository::new(pool.clone())),
			modules: Arc::new(RegistryRepository::new(pool.clone())),
			storage: Arc::new(LocalStorage::new(storage_root.path())),
		};
		TestEnv {
			ctx,
			pool,
			storage_root,
		}
	}

	pub(crate) fn make_log(link_id: Uuid, hook: &terrace_server_scm::IncomingHook) -> WebhookDeliveryLog {
		WebhookDeliveryLog {
			id: Uuid::new_v4(),
			link_id,
			event_id: hook.id.clone(),
			event_type: hook.event_type.clone(),
			git_ref: hook.git_ref.clone(),
			commit_sha: hook.commit_sha.clone(),
			tag_name: hook.tag_name.clone(),
			payload: hook.payload.clone(),
			headers: Default::default(),
			signature: None,
			signature_valid: true,
			state: DeliveryState::Logged,
			version_id: None,
			error: None,
			received_at: Utc::now(),
			processed_at: None,
		}
	}

	pub(crate) fn token_record(
		ctx: &IngestionContext,
		user_id: Uuid,
		provider_id: Uuid,
		access: &str,
		refresh: Option<&str>,
		expires_at: Option<chrono::DateTime<Utc>>,
	) -> OAuthTokenRecord {
		let now = Utc::now();
		OAuthTokenRecord {
			id: Uuid::new_v4(),
			user_id,
			provider_id,
			access_token_sealed: ctx.cipher.seal_str(access).unwrap(),
			refresh_token_sealed: refresh.map(|r| ctx.cipher.seal_str(r).unwrap()),
			token_type: "bearer".to_string(),
			scopes: vec!["repo".to_string()],
			expires_at,
			created_at: now,
			updated_at: now,
		}
	}
}
