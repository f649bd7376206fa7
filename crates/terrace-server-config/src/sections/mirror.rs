// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mirror synchronization configuration section.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct MirrorSyncConfig {
	pub enabled: bool,
	/// How often the ticker checks for mirrors whose interval has elapsed.
	pub tick_interval_secs: u64,
	pub request_timeout_secs: u64,
	pub download_timeout_secs: u64,
	pub approval_ttl_days: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MirrorSyncConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub tick_interval_secs: Option<u64>,
	#[serde(default)]
	pub request_timeout_secs: Option<u64>,
	#[serde(default)]
	pub download_timeout_secs: Option<u64>,
	#[serde(default)]
	pub approval_ttl_days: Option<u32>,
}

impl MirrorSyncConfigLayer {
	pub fn merge(&mut self, other: MirrorSyncConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.tick_interval_secs.is_some() {
			self.tick_interval_secs = other.tick_interval_secs;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.download_timeout_secs.is_some() {
			self.download_timeout_secs = other.download_timeout_secs;
		}
		if other.approval_ttl_days.is_some() {
			self.approval_ttl_days = other.approval_ttl_days;
		}
	}

	pub fn finalize(self) -> MirrorSyncConfig {
		MirrorSyncConfig {
			enabled: self.enabled.unwrap_or(true),
			tick_interval_secs: self.tick_interval_secs.unwrap_or(300),
			request_timeout_secs: self.request_timeout_secs.unwrap_or(60),
			download_timeout_secs: self.download_timeout_secs.unwrap_or(600),
			approval_ttl_days: self.approval_ttl_days.unwrap_or(30),
		}
	}
}
