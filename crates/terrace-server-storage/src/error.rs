// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("invalid storage path: {0}")]
	InvalidPath(String),

	#[error("object not found: {0}")]
	NotFound(String),

	#[error("size mismatch: expected {expected} bytes, wrote {actual}")]
	SizeMismatch { expected: u64, actual: u64 },

	#[error("storage I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
