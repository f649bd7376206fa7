// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background publish queue configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct PublishConfig {
	/// Deliveries waiting beyond this are rejected rather than buffered.
	pub queue_capacity: usize,
	pub max_concurrent: usize,
	/// Parent of per-run scratch directories; `None` uses the system temp dir.
	pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishConfigLayer {
	#[serde(default)]
	pub queue_capacity: Option<usize>,
	#[serde(default)]
	pub max_concurrent: Option<usize>,
	#[serde(default)]
	pub scratch_dir: Option<PathBuf>,
}

impl PublishConfigLayer {
	pub fn merge(&mut self, other: PublishConfigLayer) {
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.max_concurrent.is_some() {
			self.max_concurrent = other.max_concurrent;
		}
		if other.scratch_dir.is_some() {
			self.scratch_dir = other.scratch_dir;
		}
	}

	pub fn finalize(self) -> Result<PublishConfig, ConfigError> {
		let queue_capacity = self.queue_capacity.unwrap_or(64);
		let max_concurrent = self.max_concurrent.unwrap_or(4);
		if queue_capacity == 0 || max_concurrent == 0 {
			return Err(ConfigError::Validation(
				"publish.queue_capacity and publish.max_concurrent must be positive".to_string(),
			));
		}
		Ok(PublishConfig {
			queue_capacity,
			max_concurrent,
			scratch_dir: self.scratch_dir,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_zero_capacity_rejected() {
		let layer = PublishConfigLayer {
			queue_capacity: Some(0),
			..Default::default()
		};
		assert!(layer.finalize().is_err());
	}

	#[test]
	fn test_defaults() {
		let config = PublishConfigLayer::default().finalize().unwrap();
		assert_eq!(config.queue_capacity, 64);
		assert_eq!(config.max_concurrent, 4);
		assert!(config.scratch_dir.is_none());
	}
}
