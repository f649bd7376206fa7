// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
	#[error("mirror {0} not found")]
	NotFound(Uuid),

	#[error("mirror {0} is already syncing")]
	AlreadyRunning(Uuid),

	#[error("upstream {operation} failed with status {status}: {message}")]
	Upstream {
		operation: &'static str,
		status: u16,
		message: String,
	},

	#[error("upstream {operation} request failed: {message}")]
	Network { operation: &'static str, message: String },

	#[error("invalid upstream response for {operation}: {message}")]
	InvalidResponse { operation: &'static str, message: String },

	#[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
	ChecksumMismatch {
		filename: String,
		expected: String,
		actual: String,
	},

	#[error("signature verification failed: {0}")]
	SignatureInvalid(String),

	#[error("denied by mirror policy {0:?}")]
	PolicyDenied(String),

	#[error("approval required for {0}")]
	ApprovalRequired(String),

	#[error("invalid filter {filter:?}: {message}")]
	InvalidFilter { filter: String, message: String },

	#[error("provider is mirrored by another mirror: {0}")]
	Ownership(String),

	#[error("storage error: {0}")]
	Storage(#[from] terrace_server_storage::StorageError),

	#[error("database error: {0}")]
	Database(#[from] terrace_server_db::DbError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0} timed out")]
	Timeout(&'static str),

	#[error("sync cancelled")]
	Cancelled,
}

impl MirrorError {
	pub(crate) fn from_reqwest(operation: &'static str, e: reqwest::Error) -> Self {
		if e.is_timeout() {
			return MirrorError::Timeout(operation);
		}
		MirrorError::Network {
			operation,
			message: e.without_url().to_string(),
		}
	}

	/// Integrity failures are never retried.
	pub fn is_verification_failure(&self) -> bool {
		matches!(
			self,
			MirrorError::ChecksumMismatch { .. } | MirrorError::SignatureInvalid(_)
		)
	}

	pub fn is_transient(&self) -> bool {
		match self {
			MirrorError::Network { .. } | MirrorError::Timeout(_) => true,
			MirrorError::Upstream { status, .. } => *status == 429 || *status >= 500,
			_ => false,
		}
	}
}
