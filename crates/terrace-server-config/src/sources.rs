// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file, and the environment.

use std::path::PathBuf;

use terrace_common_secret::SecretString;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	CryptoConfigLayer, DatabaseConfigLayer, HttpConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	MirrorSyncConfigLayer, PublishConfigLayer, ScmConfigLayer, StorageConfigLayer,
};

/// Source precedence levels (higher overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		Ok(ServerConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/terrace/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!(path = %self.path.display(), "parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `TERRACE_SERVER_<SECTION>_<FIELD>`. Secrets also accept a
/// `<NAME>_FILE` variant pointing at a file holding the value.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		Ok(ServerConfigLayer {
			http: Some(HttpConfigLayer {
				host: env_var("TERRACE_SERVER_HOST"),
				port: env_parse("TERRACE_SERVER_PORT")?,
				base_url: env_var("TERRACE_SERVER_BASE_URL"),
			}),
			database: Some(DatabaseConfigLayer {
				url: env_var("TERRACE_SERVER_DATABASE_URL"),
			}),
			storage: Some(StorageConfigLayer {
				backend: env_parse("TERRACE_SERVER_STORAGE_BACKEND")?,
				root_dir: env_var("TERRACE_SERVER_STORAGE_ROOT_DIR").map(PathBuf::from),
			}),
			crypto: Some(CryptoConfigLayer {
				encryption_key: secret_env("TERRACE_SERVER_ENCRYPTION_KEY")?,
				passphrase: secret_env("TERRACE_SERVER_ENCRYPTION_PASSPHRASE")?,
				salt: env_var("TERRACE_SERVER_ENCRYPTION_SALT"),
				iterations: env_parse("TERRACE_SERVER_ENCRYPTION_ITERATIONS")?,
			}),
			scm: Some(ScmConfigLayer {
				webhook_base_url: env_var("TERRACE_SERVER_SCM_WEBHOOK_BASE_URL"),
				request_timeout_secs: env_parse("TERRACE_SERVER_SCM_REQUEST_TIMEOUT_SECS")?,
				archive_timeout_secs: env_parse("TERRACE_SERVER_SCM_ARCHIVE_TIMEOUT_SECS")?,
			}),
			publish: Some(PublishConfigLayer {
				queue_capacity: env_parse("TERRACE_SERVER_PUBLISH_QUEUE_CAPACITY")?,
				max_concurrent: env_parse("TERRACE_SERVER_PUBLISH_MAX_CONCURRENT")?,
				scratch_dir: env_var("TERRACE_SERVER_PUBLISH_SCRATCH_DIR").map(PathBuf::from),
			}),
			mirror: Some(MirrorSyncConfigLayer {
				enabled: env_bool("TERRACE_SERVER_MIRROR_ENABLED"),
				tick_interval_secs: env_parse("TERRACE_SERVER_MIRROR_TICK_INTERVAL_SECS")?,
				request_timeout_secs: env_parse("TERRACE_SERVER_MIRROR_REQUEST_TIMEOUT_SECS")?,
				download_timeout_secs: env_parse("TERRACE_SERVER_MIRROR_DOWNLOAD_TIMEOUT_SECS")?,
				approval_ttl_days: env_parse("TERRACE_SERVER_MIRROR_APPROVAL_TTL_DAYS")?,
			}),
			jobs: Some(JobsConfigLayer {
				immutability_check_enabled: env_bool("TERRACE_SERVER_IMMUTABILITY_CHECK_ENABLED"),
				immutability_check_interval_secs: env_parse(
					"TERRACE_SERVER_IMMUTABILITY_CHECK_INTERVAL_SECS",
				)?,
				history_retention_days: env_parse("TERRACE_SERVER_JOB_HISTORY_RETENTION_DAYS")?,
			}),
			logging: Some(LoggingConfigLayer {
				level: env_var("TERRACE_SERVER_LOG_LEVEL"),
				format: env_var("TERRACE_SERVER_LOG_FORMAT"),
			}),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: std::str::FromStr,
{
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("could not parse '{v}'"),
		}),
		None => Ok(None),
	}
}

/// Read a secret from `NAME`, or from the file named by `NAME_FILE`.
fn secret_env(name: &str) -> Result<Option<SecretString>, ConfigError> {
	if let Some(value) = env_var(name) {
		return Ok(Some(SecretString::new(value)));
	}
	let file_var = format!("{name}_FILE");
	match env_var(&file_var) {
		Some(path) => {
			let content =
				std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
					path: PathBuf::from(&path),
					source: e,
				})?;
			Ok(Some(SecretString::new(content.trim().to_string())))
		}
		None => Ok(None),
	}
}
