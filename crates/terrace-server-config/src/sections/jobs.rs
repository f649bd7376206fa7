// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
	pub immutability_check_enabled: bool,
	pub immutability_check_interval_secs: u64,
	pub history_retention_days: u32,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	#[serde(default)]
	pub immutability_check_enabled: Option<bool>,
	#[serde(default)]
	pub immutability_check_interval_secs: Option<u64>,
	#[serde(default)]
	pub history_retention_days: Option<u32>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.immutability_check_enabled.is_some() {
			self.immutability_check_enabled = other.immutability_check_enabled;
		}
		if other.immutability_check_interval_secs.is_some() {
			self.immutability_check_interval_secs = other.immutability_check_interval_secs;
		}
		if other.history_retention_days.is_some() {
			self.history_retention_days = other.history_retention_days;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			immutability_check_enabled: self.immutability_check_enabled.unwrap_or(true),
			immutability_check_interval_secs: self
				.immutability_check_interval_secs
				.unwrap_or(86400), // daily
			history_retention_days: self.history_retention_days.unwrap_or(90),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_layer_finalize_defaults() {
		let config = JobsConfigLayer::default().finalize();
		assert!(config.immutability_check_enabled);
		assert_eq!(config.immutability_check_interval_secs, 86400);
		assert_eq!(config.history_retention_days, 90);
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = JobsConfigLayer {
			immutability_check_enabled: Some(true),
			history_retention_days: Some(90),
			..Default::default()
		};
		base.merge(JobsConfigLayer {
			immutability_check_enabled: Some(false),
			..Default::default()
		});
		assert_eq!(base.immutability_check_enabled, Some(false));
		assert_eq!(base.history_retention_days, Some(90));
	}

	#[test]
	fn test_deserialize_partial() {
		let layer: JobsConfigLayer = toml::from_str("immutability_check_interval_secs = 3600").unwrap();
		assert_eq!(layer.immutability_check_interval_secs, Some(3600));
		assert!(layer.immutability_check_enabled.is_none());
	}
}
