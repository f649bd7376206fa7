// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	CryptoConfigLayer, DatabaseConfigLayer, HttpConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	MirrorSyncConfigLayer, PublishConfigLayer, ScmConfigLayer, StorageConfigLayer,
};

/// Server configuration layer; every field is optional so layers can merge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub storage: Option<StorageConfigLayer>,
	#[serde(default)]
	pub crypto: Option<CryptoConfigLayer>,
	#[serde(default)]
	pub scm: Option<ScmConfigLayer>,
	#[serde(default)]
	pub publish: Option<PublishConfigLayer>,
	#[serde(default)]
	pub mirror: Option<MirrorSyncConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. `other` wins where it has a value.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_option(&mut self.storage, other.storage, StorageConfigLayer::merge);
		merge_option(&mut self.crypto, other.crypto, CryptoConfigLayer::merge);
		merge_option(&mut self.scm, other.scm, ScmConfigLayer::merge);
		merge_option(&mut self.publish, other.publish, PublishConfigLayer::merge);
		merge_option(&mut self.mirror, other.mirror, MirrorSyncConfigLayer::merge);
		merge_option(&mut self.jobs, other.jobs, JobsConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *base = Some(incoming),
		_ => {}
	}
}
