// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential cipher key configuration.
//!
//! Either a raw 32-byte key (64 hex chars or base64) or an operator
//! passphrase with a per-install salt must be configured. A raw key wins
//! when both are present.

use serde::Deserialize;
use terrace_common_secret::SecretString;

use crate::error::ConfigError;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;
const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone)]
pub enum KeySource {
	Raw(SecretString),
	Passphrase {
		passphrase: SecretString,
		salt: String,
		iterations: u32,
	},
}

impl KeySource {
	/// Label safe for logging.
	pub fn kind(&self) -> &'static str {
		match self {
			KeySource::Raw(_) => "raw",
			KeySource::Passphrase { .. } => "passphrase",
		}
	}
}

#[derive(Debug, Clone)]
pub struct CryptoConfig {
	pub key: KeySource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CryptoConfigLayer {
	#[serde(default)]
	pub encryption_key: Option<SecretString>,
	#[serde(default)]
	pub passphrase: Option<SecretString>,
	#[serde(default)]
	pub salt: Option<String>,
	#[serde(default)]
	pub iterations: Option<u32>,
}

impl CryptoConfigLayer {
	pub fn merge(&mut self, other: CryptoConfigLayer) {
		if other.encryption_key.is_some() {
			self.encryption_key = other.encryption_key;
		}
		if other.passphrase.is_some() {
			self.passphrase = other.passphrase;
		}
		if other.salt.is_some() {
			self.salt = other.salt;
		}
		if other.iterations.is_some() {
			self.iterations = other.iterations;
		}
	}

	pub fn finalize(self) -> Result<CryptoConfig, ConfigError> {
		if let Some(key) = self.encryption_key.filter(|k| !k.is_empty()) {
			return Ok(CryptoConfig {
				key: KeySource::Raw(key),
			});
		}

		let Some(passphrase) = self.passphrase.filter(|p| !p.is_empty()) else {
			return Err(ConfigError::Validation(
				"either crypto.encryption_key or crypto.passphrase must be set".to_string(),
			));
		};
		let Some(salt) = self.salt.filter(|s| !s.is_empty()) else {
			return Err(ConfigError::Validation(
				"crypto.salt is required with crypto.passphrase".to_string(),
			));
		};
		let iterations = self.iterations.unwrap_or(DEFAULT_PBKDF2_ITERATIONS);
		if iterations < MIN_PBKDF2_ITERATIONS {
			return Err(ConfigError::InvalidValue {
				key: "crypto.iterations".to_string(),
				message: format!("must be at least {MIN_PBKDF2_ITERATIONS}"),
			});
		}

		Ok(CryptoConfig {
			key: KeySource::Passphrase {
				passphrase,
				salt,
				iterations,
			},
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_raw_key_wins() {
		let config = CryptoConfigLayer {
			encryption_key: Some("k".into()),
			passphrase: Some("p".into()),
			salt: Some("s".to_string()),
			iterations: None,
		}
		.finalize()
		.unwrap();
		assert_eq!(config.key.kind(), "raw");
	}

	#[test]
	fn test_passphrase_requires_salt() {
		let err = CryptoConfigLayer {
			passphrase: Some("p".into()),
			..Default::default()
		}
		.finalize()
		.unwrap_err();
		assert!(err.to_string().contains("salt"));
	}

	#[test]
	fn test_low_iterations_rejected() {
		let err = CryptoConfigLayer {
			passphrase: Some("p".into()),
			salt: Some("c2FsdHNhbHQ=".to_string()),
			iterations: Some(10),
			..Default::default()
		}
		.finalize()
		.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
	}

	#[test]
	fn test_passphrase_defaults_iterations() {
		let config = CryptoConfigLayer {
			passphrase: Some("p".into()),
			salt: Some("c2FsdHNhbHQ=".to_string()),
			..Default::default()
		}
		.finalize()
		.unwrap();
		match config.key {
			KeySource::Passphrase { iterations, .. } => {
				assert_eq!(iterations, DEFAULT_PBKDF2_ITERATIONS)
			}
			KeySource::Raw(_) => panic!("expected passphrase"),
		}
	}
}
