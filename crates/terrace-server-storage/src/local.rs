// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError};
use crate::path::validate_object_path;
use crate::{ByteReader, Storage, StoredObject};

const CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem backend rooted at a single directory.
///
/// Uploads are written to a sibling temporary file and renamed into place, so
/// a reader never observes a partially written object.
#[derive(Debug, Clone)]
pub struct LocalStorage {
	root: PathBuf,
	base_url: Option<String>,
}

impl LocalStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			base_url: None,
		}
	}

	/// Public URL prefix used by [`Storage::get_url`] instead of `file://` URLs.
	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn resolve(&self, path: &str) -> Result<PathBuf> {
		validate_object_path(path)?;
		Ok(self.root.join(path))
	}
}

#[async_trait]
impl Storage for LocalStorage {
	fn backend(&self) -> &'static str {
		"local"
	}

	#[instrument(skip(self, body), fields(path = %path))]
	async fn upload(&self, path: &str, mut body: ByteReader, size: Option<u64>) -> Result<StoredObject> {
		let full_path = self.resolve(path)?;
		if let Some(parent) = full_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let partial = full_path.with_extension(format!("partial-{}", uuid::Uuid::new_v4().simple()));
		let written = write_hashed(&partial, &mut body).await;

		let (checksum, actual) = match written {
			Ok(done) => done,
			Err(e) => {
				let _ = tokio::fs::remove_file(&partial).await;
				return Err(e);
			}
		};

		if let Some(expected) = size {
			if expected != actual {
				let _ = tokio::fs::remove_file(&partial).await;
				return Err(StorageError::SizeMismatch { expected, actual });
			}
		}

		tokio::fs::rename(&partial, &full_path).await?;
		debug!(size = actual, checksum = %checksum, "object stored");

		Ok(StoredObject {
			path: path.to_string(),
			checksum,
			size: actual,
		})
	}

	#[instrument(skip(self), fields(path = %path))]
	async fn download(&self, path: &str) -> Result<ByteReader> {
		let full_path = self.resolve(path)?;
		match tokio::fs::File::open(&full_path).await {
			Ok(file) => Ok(Box::new(file)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self), fields(path = %path))]
	async fn delete(&self, path: &str) -> Result<()> {
		let full_path = self.resolve(path)?;
		match tokio::fs::remove_file(&full_path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!("delete of missing object ignored");
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn get_url(&self, path: &str, ttl: Duration) -> Result<String> {
		let full_path = self.resolve(path)?;
		match &self.base_url {
			Some(base) => {
				let expires = chrono::Utc::now()
					+ chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
				Ok(format!("{base}/{path}?expires={}", expires.timestamp()))
			}
			None => {
				let absolute = if full_path.is_absolute() {
					full_path
				} else {
					std::env::current_dir()?.join(full_path)
				};
				url::Url::from_file_path(&absolute)
					.map(|u| u.to_string())
					.map_err(|_| StorageError::InvalidPath(path.to_string()))
			}
		}
	}

	async fn exists(&self, path: &str) -> Result<bool> {
		let full_path = self.resolve(path)?;
		Ok(tokio::fs::try_exists(&full_path).await?)
	}
}

async fn write_hashed(target: &Path, body: &mut ByteReader) -> Result<(String, u64)> {
	let mut file = tokio::fs::File::create(target).await?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; CHUNK_SIZE];
	let mut total = 0u64;

	loop {
		let n = body.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
		file.write_all(&buf[..n]).await?;
		total += n as u64;
	}
	file.flush().await?;
	file.sync_all().await?;

	Ok((hex::encode(hasher.finalize()), total))
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn checksum_matches_content(data in proptest::collection::vec(any::<u8>(), 0..200_000)) {
			let rt = tokio::runtime::Runtime::new().unwrap();
			let dir = tempfile::TempDir::new().unwrap();
			let storage = LocalStorage::new(dir.path());

			let stored = rt
				.block_on(storage.upload("blob.bin", Box::new(std::io::Cursor::new(data.clone())), None))
				.unwrap();
			let expected = hex::encode(Sha256::digest(&data));
			prop_assert_eq!(stored.checksum, expected);
			prop_assert_eq!(stored.size, data.len() as u64);
		}
	}
}
