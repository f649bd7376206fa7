// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Artifact storage for published modules and mirrored provider binaries.
//!
//! Objects are addressed by relative, slash-separated paths. Every upload
//! reports the SHA-256 of the bytes actually written so callers never need
//! to re-read an object to checksum it.

mod error;
mod local;
mod path;

pub use error::{Result, StorageError};
pub use local::LocalStorage;
pub use path::validate_object_path;

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Owned byte source for uploads and downloads.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
	pub path: String,
	/// Lowercase hex SHA-256 of the stored bytes.
	pub checksum: String,
	pub size: u64,
}

#[async_trait]
pub trait Storage: Send + Sync {
	/// Backend identifier recorded on artifact rows.
	fn backend(&self) -> &'static str;

	/// Store `body` at `path`. When `size` is given the written length must match.
	async fn upload(&self, path: &str, body: ByteReader, size: Option<u64>) -> Result<StoredObject>;

	async fn download(&self, path: &str) -> Result<ByteReader>;

	/// Deleting a missing object is not an error.
	async fn delete(&self, path: &str) -> Result<()>;

	async fn get_url(&self, path: &str, ttl: Duration) -> Result<String>;

	async fn exists(&self, path: &str) -> Result<bool>;
}
