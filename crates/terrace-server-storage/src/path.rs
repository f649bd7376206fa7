// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Component, Path};

use crate::error::{Result, StorageError};

/// Reject object paths that could resolve outside the storage root.
pub fn validate_object_path(path: &str) -> Result<()> {
	if path.is_empty() || path.contains('\\') || path.contains('\0') {
		return Err(StorageError::InvalidPath(path.to_string()));
	}
	let all_normal = Path::new(path)
		.components()
		.all(|c| matches!(c, Component::Normal(_)));
	if !all_normal {
		return Err(StorageError::InvalidPath(path.to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_accepts_relative_paths() {
		assert!(validate_object_path("modules/acme/vpc/aws/1.0.0.tar.gz").is_ok());
		assert!(validate_object_path("file.zip").is_ok());
	}

	#[test]
	fn test_rejects_escaping_paths() {
		for bad in ["", "/etc/passwd", "../x", "a/../../b", "a\\b", "./a"] {
			assert!(validate_object_path(bad).is_err(), "{bad} should be rejected");
		}
	}
}
