// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use rand::RngCore;
use terrace_common_secret::SecretString;
use terrace_server_db::{LinkWebhookUpdate, RepositoryLink};
use terrace_server_scm::{ScmError, WebhookConfig};
use tracing::{info, instrument, warn};

use crate::context::IngestionContext;
use crate::error::{PublishError, Result};

const WEBHOOK_SECRET_BYTES: usize = 32;

/// Installs and removes the repository webhook behind a link.
pub struct WebhookRegistrar {
	ctx: IngestionContext,
	webhook_base_url: String,
}

pub fn generate_webhook_secret() -> SecretString {
	let mut bytes = [0u8; WEBHOOK_SECRET_BYTES];
	rand::thread_rng().fill_bytes(&mut bytes);
	SecretString::new(hex::encode(bytes))
}

impl WebhookRegistrar {
	pub fn new(ctx: IngestionContext, webhook_base_url: impl Into<String>) -> Self {
		Self {
			ctx,
			webhook_base_url: webhook_base_url.into().trim_end_matches('/').to_string(),
		}
	}

	/// Delivery URL without its secret segment.
	pub fn delivery_base(&self, link: &RepositoryLink) -> String {
		format!("{}/webhooks/scm/{}", self.webhook_base_url, link.id)
	}

	/// Register a webhook with a fresh secret, replacing any existing one.
	///
	/// The stored `webhook_url` omits the secret segment; the secret itself
	/// is stored sealed.
	#[instrument(skip(self, link), fields(link_id = %link.id, repo = %format!("{}/{}", link.owner, link.repo_name)))]
	pub async fn enable(&self, link: &RepositoryLink) -> Result<RepositoryLink> {
		let provider = self.ctx.provider(link.provider_id).await?;
		let connector = self.ctx.connector_for(&provider)?;
		let token = self.ctx.access_token_for(link, &provider, connector.as_ref()).await?;

		if let Some(existing) = link.webhook_id.as_deref() {
			match connector
				.remove_webhook(&token, &link.owner, &link.repo_name, existing)
				.await
			{
				Ok(()) | Err(ScmError::WebhookNotFound(_)) => {}
				Err(e) => warn!(webhook_id = %existing, error = %e, "failed to remove previous webhook"),
			}
		}

		let secret = generate_webhook_secret();
		let base = self.delivery_base(link);
		let config = WebhookConfig {
			url: format!("{base}/{}", secret.expose()),
			secret: secret.clone(),
			events: vec!["push".to_string()],
		};
		let hook = connector
			.register_webhook(&token, &link.owner, &link.repo_name, &config)
			.await?;

		let sealed = self
			.ctx
			.cipher
			.seal_str(secret.expose())
			.map_err(|e| PublishError::Credentials(format!("failed to seal webhook secret: {e}")))?;
		let update = LinkWebhookUpdate {
			webhook_id: Some(hook.id.clone()),
			webhook_secret_sealed: Some(sealed),
			webhook_url: Some(base),
			webhook_enabled: true,
		};
		self.ctx.links.update_link_webhook(link.id, &update).await?;
		info!(webhook_id = %hook.id, active = hook.active, "webhook registered");

		self.ctx.link(link.id).await
	}

	/// Remove the webhook and clear the link's webhook fields. A hook already
	/// deleted on the SCM side is not an error.
	#[instrument(skip(self, link), fields(link_id = %link.id))]
	pub async fn disable(&self, link: &RepositoryLink) -> Result<RepositoryLink> {
		if let Some(webhook_id) = link.webhook_id.as_deref() {
			let provider = self.ctx.provider(link.provider_id).await?;
			let connector = self.ctx.connector_for(&provider)?;
			let token = self.ctx.access_token_for(link, &provider, connector.as_ref()).await?;
			match connector
				.remove_webhook(&token, &link.owner, &link.repo_name, webhook_id)
				.await
			{
				Ok(()) => info!(webhook_id = %webhook_id, "webhook removed"),
				Err(ScmError::WebhookNotFound(_)) => {
					info!(webhook_id = %webhook_id, "webhook already gone")
				}
				Err(e) => return Err(e.into()),
			}
		}

		let update = LinkWebhookUpdate {
			webhook_id: None,
			webhook_secret_sealed: None,
			webhook_url: None,
			webhook_enabled: false,
		};
		self.ctx.links.update_link_webhook(link.id, &update).await?;
		self.ctx.link(link.id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::test_support::{test_env, token_record, TestEnv};
	use std::sync::Arc;
	use terrace_server_db::testing::seed_link;
	use terrace_server_db::ScmKind;
	use terrace_server_scm::testing::MockConnector;
	use terrace_server_scm::{ConnectorDefaults, ConnectorFactory, ConnectorRegistry, ConnectorSettings, ScmConnector};
	use uuid::Uuid;

	async fn with_mock(env: &mut TestEnv) -> Arc<MockConnector> {
		let mock = Arc::new(MockConnector::new(ScmKind::GitHub));
		let shared = mock.clone();
		let build: ConnectorFactory = Arc::new(move |_settings: ConnectorSettings| -> terrace_server_scm::Result<Arc<dyn ScmConnector>> {
			Ok(shared.clone() as Arc<dyn ScmConnector>)
		});
		let mut registry = ConnectorRegistry::new(ConnectorDefaults::default());
		registry.register(ScmKind::GitHub, build);
		env.ctx.connectors = Arc::new(registry);
		mock
	}

	#[test]
	fn test_generated_secrets_are_random_hex() {
		let a = generate_webhook_secret();
		let b = generate_webhook_secret();
		assert_eq!(a.expose().len(), WEBHOOK_SECRET_BYTES * 2);
		assert!(a.expose().chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(a.expose(), b.expose());
	}

	#[tokio::test]
	async fn test_enable_then_disable() {
		let mut env = test_env().await;
		let mock = with_mock(&mut env).await;
		let (_, provider, link) = seed_link(&env.pool).await;
		env.ctx
			.tokens
			.upsert_token(&token_record(&env.ctx, Uuid::new_v4(), provider.id, "gho_admin", None, None))
			.await
			.unwrap();

		let registrar = WebhookRegistrar::new(env.ctx.clone(), "https://terrace.example/");
		let enabled = registrar.enable(&link).await.unwrap();

		assert!(enabled.webhook_enabled);
		assert_eq!(enabled.webhook_id.as_deref(), Some("hook-1"));
		assert_eq!(
			enabled.webhook_url.as_deref(),
			Some(format!("https://terrace.example/webhooks/scm/{}", link.id).as_str())
		);
		let secret = env
			.ctx
			.open_secret(enabled.webhook_secret_sealed.as_deref().unwrap(), "webhook secret")
			.unwrap();
		assert_eq!(secret.expose().len(), 64);
		assert_eq!(*mock.registered.lock().unwrap(), vec!["acme/terraform-aws-vpc".to_string()]);

		let again = registrar.enable(&enabled).await.unwrap();
		assert_eq!(again.webhook_id.as_deref(), Some("hook-2"));
		assert_eq!(*mock.removed.lock().unwrap(), vec!["hook-1".to_string()]);

		let disabled = registrar.disable(&again).await.unwrap();
		assert!(!disabled.webhook_enabled);
		assert!(disabled.webhook_id.is_none());
		assert!(disabled.webhook_secret_sealed.is_none());
		assert_eq!(mock.removed.lock().unwrap().last().map(String::as_str), Some("hook-2"));
	}

	#[tokio::test]
	async fn test_enable_without_token_fails_before_registering() {
		let mut env = test_env().await;
		let mock = with_mock(&mut env).await;
		let (_, _, link) = seed_link(&env.pool).await;

		let registrar = WebhookRegistrar::new(env.ctx.clone(), "https://terrace.example");
		let err = registrar.enable(&link).await.unwrap_err();
		assert!(matches!(err, PublishError::Credentials(_)));
		assert!(mock.registered.lock().unwrap().is_empty());
		assert!(!env.ctx.link(link.id).await.unwrap().webhook_enabled);
	}
}
