// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the terrace registry server.
//!
//! Layers are merged in precedence order (defaults, then the TOML file, then
//! `TERRACE_SERVER_*` environment variables) and finalized into a
//! [`ServerConfig`].
//!
//! ```ignore
//! let config = terrace_server_config::load_config()?;
//! println!("listening on {}", config.socket_addr());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "TERRACE_SERVER_CONFIG";

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub storage: StorageConfig,
	pub crypto: CryptoConfig,
	pub scm: ScmConfig,
	pub publish: PublishConfig,
	pub mirror: MirrorSyncConfig,
	pub jobs: JobsConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from defaults, the config file and the environment.
///
/// The file path comes from `TERRACE_SERVER_CONFIG`, falling back to
/// `/etc/terrace/server.toml`. A missing file is skipped.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	let toml = match std::env::var(CONFIG_PATH_ENV) {
		Ok(path) if !path.is_empty() => TomlSource::new(PathBuf::from(path)),
		_ => TomlSource::system(),
	};
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(toml),
		Box::new(EnvSource),
	])
}

/// Load configuration with an explicit config file path.
pub fn load_config_with_file(path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Resolve a merged layer into a validated configuration.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let storage = layer.storage.unwrap_or_default().finalize()?;
	let crypto = layer.crypto.unwrap_or_default().finalize()?;
	let scm = layer.scm.unwrap_or_default().finalize(&http.base_url);
	let publish = layer.publish.unwrap_or_default().finalize()?;
	let mirror = layer.mirror.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize()?;

	info!(
		host = %http.host,
		port = http.port,
		database = %database.url,
		storage_root = %storage.root_dir.display(),
		key_source = crypto.key.kind(),
		mirror_enabled = mirror.enabled,
		immutability_check_enabled = jobs.immutability_check_enabled,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		http,
		database,
		storage,
		crypto,
		scm,
		publish,
		mirror,
		jobs,
		logging,
	})
}
