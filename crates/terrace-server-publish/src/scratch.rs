// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Private working directory for one publish run, removed when dropped.
///
/// Drop runs on every exit path, including early returns, panics and
/// cancellation of the owning future.
#[derive(Debug)]
pub struct ScratchDir {
	dir: TempDir,
}

impl ScratchDir {
	/// Create a uniquely named directory under `parent`, or the system temp
	/// dir when `parent` is `None`.
	pub fn create(parent: Option<&Path>) -> std::io::Result<Self> {
		let mut builder = tempfile::Builder::new();
		builder.prefix("terrace-publish-");
		let dir = match parent {
			Some(parent) => {
				std::fs::create_dir_all(parent)?;
				builder.tempdir_in(parent)?
			}
			None => builder.tempdir()?,
		};
		debug!(path = %dir.path().display(), "created scratch directory");
		Ok(Self { dir })
	}

	pub fn path(&self) -> &Path {
		self.dir.path()
	}

	pub fn join(&self, name: &str) -> PathBuf {
		self.dir.path().join(name)
	}

	/// Create and return a fresh subdirectory.
	pub fn subdir(&self, name: &str) -> std::io::Result<PathBuf> {
		let path = self.join(name);
		std::fs::create_dir_all(&path)?;
		Ok(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_removed_on_drop() {
		let parent = tempfile::tempdir().unwrap();
		let scratch = ScratchDir::create(Some(parent.path())).unwrap();
		let path = scratch.path().to_path_buf();
		std::fs::write(scratch.join("file"), b"x").unwrap();
		scratch.subdir("nested/deeper").unwrap();
		assert!(path.exists());

		drop(scratch);
		assert!(!path.exists());
	}

	#[test]
	fn test_removed_on_panic() {
		let parent = tempfile::tempdir().unwrap();
		let parent_path = parent.path().to_path_buf();

		let result = std::panic::catch_unwind(move || {
			let scratch = ScratchDir::create(Some(&parent_path)).unwrap();
			std::fs::write(scratch.join("partial"), b"x").unwrap();
			panic!("extraction blew up");
		});
		assert!(result.is_err());
		assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
	}

	#[test]
	fn test_concurrent_runs_get_distinct_dirs() {
		let a = ScratchDir::create(None).unwrap();
		let b = ScratchDir::create(None).unwrap();
		assert_ne!(a.path(), b.path());
		assert!(a
			.path()
			.file_name()
			.unwrap()
			.to_string_lossy()
			.starts_with("terrace-publish-"));
	}
}
