// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use terrace_common_secret::SecretString;
use terrace_server_db::{ScmKind, ScmProviderConfig};
use tracing::debug;

use crate::azure_devops::AzureDevOpsConnector;
use crate::bitbucket_dc::BitbucketDcConnector;
use crate::connector::ScmConnector;
use crate::error::{Result, ScmError};
use crate::github::GitHubConnector;
use crate::gitlab::GitLabConnector;
use crate::types::ConnectorSettings;

pub type ConnectorFactory = Arc<dyn Fn(ConnectorSettings) -> Result<Arc<dyn ScmConnector>> + Send + Sync>;

/// Wrap a connector constructor as a registry factory.
pub fn factory<C, F>(ctor: F) -> ConnectorFactory
where
	C: ScmConnector + 'static,
	F: Fn(ConnectorSettings) -> Result<C> + Send + Sync + 'static,
{
	Arc::new(move |settings: ConnectorSettings| {
		let connector: Arc<dyn ScmConnector> = Arc::new(ctor(settings)?);
		Ok(connector)
	})
}

/// Process-wide options applied to every connector built by the registry.
#[derive(Debug, Clone)]
pub struct ConnectorDefaults {
	/// Public server URL used to derive OAuth redirect URIs.
	pub redirect_base_url: String,
	pub request_timeout: Duration,
	pub archive_timeout: Duration,
}

impl Default for ConnectorDefaults {
	fn default() -> Self {
		Self {
			redirect_base_url: "http://localhost:8080".to_string(),
			request_timeout: Duration::from_secs(30),
			archive_timeout: Duration::from_secs(300),
		}
	}
}

/// Builds connectors from persisted provider configuration, keyed by kind.
#[derive(Clone)]
pub struct ConnectorRegistry {
	factories: HashMap<ScmKind, ConnectorFactory>,
	defaults: ConnectorDefaults,
}

impl ConnectorRegistry {
	pub fn new(defaults: ConnectorDefaults) -> Self {
		Self {
			factories: HashMap::new(),
			defaults,
		}
	}

	/// Registry with a factory for every supported provider kind.
	pub fn with_builtin(defaults: ConnectorDefaults) -> Self {
		let mut registry = Self::new(defaults);
		registry.register(ScmKind::GitHub, factory(GitHubConnector::new));
		registry.register(ScmKind::GitLab, factory(GitLabConnector::new));
		registry.register(ScmKind::AzureDevOps, factory(AzureDevOpsConnector::new));
		registry.register(ScmKind::BitbucketDc, factory(BitbucketDcConnector::new));
		registry
	}

	pub fn register(&mut self, kind: ScmKind, factory: ConnectorFactory) {
		debug!(kind = %kind, "registered SCM connector factory");
		self.factories.insert(kind, factory);
	}

	pub fn supports(&self, kind: ScmKind) -> bool {
		self.factories.contains_key(&kind)
	}

	pub fn build(&self, settings: ConnectorSettings) -> Result<Arc<dyn ScmConnector>> {
		let factory = self
			.factories
			.get(&settings.kind)
			.ok_or_else(|| ScmError::Config(format!("no connector registered for {}", settings.kind)))?;
		factory(settings)
	}

	/// Build a connector for a stored provider. `client_secret` is the opened
	/// plaintext of `client_secret_sealed`.
	pub fn build_for(&self, config: &ScmProviderConfig, client_secret: SecretString) -> Result<Arc<dyn ScmConnector>> {
		if !config.is_active {
			return Err(ScmError::Config(format!("SCM provider {} is disabled", config.id)));
		}
		self.build(self.settings_for(config, client_secret))
	}

	pub fn settings_for(&self, config: &ScmProviderConfig, client_secret: SecretString) -> ConnectorSettings {
		ConnectorSettings {
			kind: config.kind,
			base_url: config.base_url.clone(),
			tenant_id: config.tenant_id.clone(),
			client_id: config.client_id.clone(),
			client_secret,
			redirect_uri: format!(
				"{}/api/scm/providers/{}/callback",
				self.defaults.redirect_base_url.trim_end_matches('/'),
				config.id
			),
			auth_base_url: None,
			request_timeout: self.defaults.request_timeout,
			archive_timeout: self.defaults.archive_timeout,
		}
	}
}
