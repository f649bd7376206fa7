// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use terrace_server_db::DbError;
use terrace_server_scm::ScmError;
use terrace_server_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
	#[error("could not extract version from tag {tag:?}")]
	VersionExtraction { tag: String },

	#[error("invalid tag pattern {0:?}")]
	InvalidTagPattern(String),

	#[error("version {version} already exists")]
	Conflict { version: String },

	#[error("archive entry escapes extraction root: {0}")]
	PathTraversal(String),

	#[error("invalid archive: {0}")]
	InvalidArchive(String),

	#[error("invalid module structure: {0}")]
	InvalidModuleStructure(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("credential error: {0}")]
	Credentials(String),

	#[error(transparent)]
	Scm(#[from] ScmError),

	#[error("storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0} timed out")]
	Timeout(&'static str),
}

impl PublishError {
	pub fn is_conflict(&self) -> bool {
		matches!(self, PublishError::Conflict { .. })
	}

	/// Malformed input and verification failures are terminal for an event.
	pub fn is_terminal(&self) -> bool {
		match self {
			PublishError::Scm(e) => !e.is_transient(),
			PublishError::Timeout(_) | PublishError::Storage(_) | PublishError::Database(_) | PublishError::Io(_) => {
				false
			}
			_ => true,
		}
	}
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Rejections surfaced to the webhook sender.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
	/// Unknown link, disabled webhook or wrong path secret. Indistinguishable
	/// on purpose so link ids cannot be probed.
	#[error("webhook not found")]
	NotFound,

	#[error("invalid webhook signature")]
	InvalidSignature,

	#[error("malformed payload: {0}")]
	InvalidPayload(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl From<DbError> for IngestError {
	fn from(e: DbError) -> Self {
		IngestError::Internal(e.to_string())
	}
}

impl From<PublishError> for IngestError {
	fn from(e: PublishError) -> Self {
		match e {
			PublishError::NotFound(_) => IngestError::NotFound,
			other => IngestError::Internal(other.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_extraction_message() {
		let e = PublishError::VersionExtraction { tag: "latest".into() };
		assert_eq!(e.to_string(), "could not extract version from tag \"latest\"");
		assert!(e.is_terminal());
	}

	#[test]
	fn test_transient_errors_are_not_terminal() {
		assert!(!PublishError::Timeout("download").is_terminal());
		let scm = PublishError::Scm(ScmError::Api {
			operation: "download_source_archive",
			status: 503,
			message: "unavailable".into(),
		});
		assert!(!scm.is_terminal());
		assert!(PublishError::Conflict { version: "1.0.0".into() }.is_conflict());
	}
}
