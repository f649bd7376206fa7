// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Artifact storage configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
	Local,
}

impl std::str::FromStr for StorageBackendKind {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"local" => Ok(StorageBackendKind::Local),
			other => Err(ConfigError::InvalidValue {
				key: "storage.backend".to_string(),
				message: format!("unsupported storage backend '{other}'"),
			}),
		}
	}
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
	pub backend: StorageBackendKind,
	pub root_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfigLayer {
	#[serde(default)]
	pub backend: Option<StorageBackendKind>,
	#[serde(default)]
	pub root_dir: Option<PathBuf>,
}

impl StorageConfigLayer {
	pub fn merge(&mut self, other: StorageConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.root_dir.is_some() {
			self.root_dir = other.root_dir;
		}
	}

	pub fn finalize(self) -> Result<StorageConfig, ConfigError> {
		let root_dir = self
			.root_dir
			.unwrap_or_else(|| PathBuf::from("./data/artifacts"));
		if root_dir.as_os_str().is_empty() {
			return Err(ConfigError::Validation(
				"storage.root_dir must not be empty".to_string(),
			));
		}
		Ok(StorageConfig {
			backend: self.backend.unwrap_or(StorageBackendKind::Local),
			root_dir,
		})
	}
}
