// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Source archive extraction and module repackaging.
//!
//! Everything here is blocking file I/O; async callers go through
//! `spawn_blocking`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::EntryType;
use terrace_server_scm::ArchiveFormat;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PublishError, Result};

/// Name of the provenance manifest added to every published archive.
pub const PROVENANCE_FILE: &str = ".terrace-provenance";

const MAX_ENTRIES: usize = 20_000;
const MAX_UNPACKED_BYTES: u64 = 512 * 1024 * 1024;
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
	pub files: usize,
	pub bytes: u64,
}

impl ExtractStats {
	fn charge(&mut self, size: u64) -> Result<()> {
		self.files += 1;
		self.bytes = self.bytes.saturating_add(size);
		if self.files > MAX_ENTRIES {
			return Err(PublishError::InvalidArchive(format!("more than {MAX_ENTRIES} entries")));
		}
		if self.bytes > MAX_UNPACKED_BYTES {
			return Err(PublishError::InvalidArchive(format!(
				"unpacked size exceeds {MAX_UNPACKED_BYTES} bytes"
			)));
		}
		Ok(())
	}
}

/// Resolve an archive entry name under `root`.
///
/// Only plain components are accepted; `..`, absolute paths and drive
/// prefixes are rejected before anything touches the filesystem.
pub fn safe_join(root: &Path, entry: &Path) -> Result<PathBuf> {
	let mut resolved = root.to_path_buf();
	for component in entry.components() {
		match component {
			Component::Normal(part) => resolved.push(part),
			Component::CurDir => {}
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(PublishError::PathTraversal(entry.display().to_string()));
			}
		}
	}
	Ok(resolved)
}

pub fn extract_archive(archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<ExtractStats> {
	std::fs::create_dir_all(dest)?;
	let stats = match format {
		ArchiveFormat::TarGz => extract_tar_gz(archive, dest)?,
		ArchiveFormat::Zip => extract_zip(archive, dest)?,
	};
	debug!(files = stats.files, bytes = stats.bytes, "extracted source archive");
	Ok(stats)
}

fn invalid(e: impl std::fmt::Display) -> PublishError {
	PublishError::InvalidArchive(e.to_string())
}

fn write_entry(target: &Path, reader: &mut impl io::Read) -> Result<()> {
	if let Some(parent) = target.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let mut out = File::create(target)?;
	io::copy(reader, &mut out)?;
	Ok(())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<ExtractStats> {
	let file = File::open(archive)?;
	let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
	let mut stats = ExtractStats::default();

	for entry in tar.entries().map_err(invalid)? {
		let mut entry = entry.map_err(invalid)?;
		let entry_type = entry.header().entry_type();
		if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
			continue;
		}

		let name = entry.path().map_err(invalid)?.into_owned();
		let target = safe_join(dest, &name)?;

		if entry_type.is_dir() {
			std::fs::create_dir_all(&target)?;
		} else if entry_type.is_file() {
			stats.charge(entry.size())?;
			write_entry(&target, &mut entry)?;
		} else {
			warn!(entry = %name.display(), ?entry_type, "skipping non-regular archive entry");
		}
	}

	Ok(stats)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<ExtractStats> {
	let file = File::open(archive)?;
	let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(invalid)?;
	let mut stats = ExtractStats::default();

	for i in 0..zip.len() {
		let mut entry = zip.by_index(i).map_err(invalid)?;
		let name = entry.name().replace('\\', "/");
		let target = safe_join(dest, Path::new(&name))?;

		if entry.is_dir() {
			std::fs::create_dir_all(&target)?;
		} else if entry.unix_mode().is_some_and(|m| m & S_IFMT == S_IFLNK) {
			warn!(entry = %name, "skipping symlink archive entry");
		} else {
			stats.charge(entry.size())?;
			write_entry(&target, &mut entry)?;
		}
	}

	Ok(stats)
}

fn has_module_files(dir: &Path) -> bool {
	std::fs::read_dir(dir)
		.map(|entries| {
			entries
				.filter_map(|e| e.ok())
				.any(|e| e.path().is_file() && is_module_file(&e.file_name().to_string_lossy()))
		})
		.unwrap_or(false)
}

fn is_module_file(name: &str) -> bool {
	name.ends_with(".tf") || name.ends_with(".tf.json")
}

/// Find the module directory inside an extracted checkout.
///
/// Hosts commonly wrap the tree in a single `{repo}-{sha}/` directory; the
/// wrapper is used when the subpath does not resolve at the top level.
pub fn locate_module_root(extracted: &Path, module_path: &str) -> Result<PathBuf> {
	let sub = module_path.trim().trim_matches('/');
	let resolve = |base: &Path| -> Result<PathBuf> {
		if sub.is_empty() || sub == "." {
			return Ok(base.to_path_buf());
		}
		safe_join(base, Path::new(sub))
			.map_err(|_| PublishError::InvalidModuleStructure(format!("module path {sub:?} escapes the repository")))
	};

	let direct = resolve(extracted)?;
	if direct.is_dir() && has_module_files(&direct) {
		return Ok(direct);
	}

	let top: Vec<_> = std::fs::read_dir(extracted)?.collect::<io::Result<Vec<_>>>()?;
	if let [only] = top.as_slice() {
		if only.file_type()?.is_dir() {
			let wrapped = resolve(&only.path())?;
			if wrapped.is_dir() {
				return Ok(wrapped);
			}
		}
	}

	if direct.is_dir() {
		return Ok(direct);
	}
	Err(PublishError::InvalidModuleStructure(format!(
		"module path {sub:?} not found in archive"
	)))
}

/// Require at least one Terraform configuration file at the module root.
pub fn validate_module(root: &Path) -> Result<()> {
	if has_module_files(root) {
		Ok(())
	} else {
		Err(PublishError::InvalidModuleStructure(
			"no Terraform configuration files (*.tf) at module root".to_string(),
		))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
	pub path: PathBuf,
	/// Hex SHA-256 of the archive bytes.
	pub checksum: String,
	pub size: u64,
}

/// Writer that hashes and counts bytes on their way to `inner`.
struct HashingWriter<W: Write> {
	inner: W,
	hasher: Sha256,
	written: u64,
}

impl<W: Write> HashingWriter<W> {
	fn new(inner: W) -> Self {
		Self {
			inner,
			hasher: Sha256::new(),
			written: 0,
		}
	}

	fn finish(mut self) -> io::Result<(String, u64)> {
		self.inner.flush()?;
		Ok((hex::encode(self.hasher.finalize()), self.written))
	}
}

impl<W: Write> Write for HashingWriter<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = self.inner.write(buf)?;
		self.hasher.update(&buf[..n]);
		self.written += n as u64;
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.flush()
	}
}

pub fn provenance_manifest(commit: &str, published_at: DateTime<Utc>) -> String {
	format!(
		"commit: {commit}\npublished: {}\n",
		published_at.to_rfc3339_opts(SecondsFormat::Secs, true)
	)
}

/// Write `root` plus a provenance manifest to a gzip tarball at `out`,
/// hashing the output as it is written.
///
/// `.git` directories and symlinks are left out.
pub fn repackage(root: &Path, commit: &str, published_at: DateTime<Utc>, out: &Path) -> Result<PackagedArchive> {
	let file = File::create(out)?;
	let encoder = GzEncoder::new(HashingWriter::new(BufWriter::new(file)), Compression::default());
	let mut builder = tar::Builder::new(encoder);
	builder.mode(tar::HeaderMode::Deterministic);
	builder.follow_symlinks(false);

	let manifest = provenance_manifest(commit, published_at);
	let mut header = tar::Header::new_gnu();
	header.set_size(manifest.len() as u64);
	header.set_mode(0o644);
	header.set_mtime(published_at.timestamp().max(0) as u64);
	header.set_cksum();
	builder.append_data(&mut header, PROVENANCE_FILE, manifest.as_bytes())?;

	let walker = WalkDir::new(root)
		.min_depth(1)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|e| e.file_name() != ".git");

	let mut files = 0usize;
	for entry in walker {
		let entry = entry.map_err(io::Error::from)?;
		let relative = entry
			.path()
			.strip_prefix(root)
			.map_err(|e| PublishError::InvalidArchive(e.to_string()))?;
		if relative == Path::new(PROVENANCE_FILE) {
			continue;
		}

		let file_type = entry.file_type();
		if file_type.is_dir() {
			builder.append_dir(relative, entry.path())?;
		} else if file_type.is_file() {
			builder.append_path_with_name(entry.path(), relative)?;
			files += 1;
		}
	}

	let encoder = builder.into_inner()?;
	let (checksum, size) = encoder.finish()?.finish()?;
	debug!(files, size, checksum = %checksum, "repackaged module");

	Ok(PackagedArchive {
		path: out.to_path_buf(),
		checksum,
		size,
	})
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use std::io::Cursor;

	/// Gzip tarball from `(name, contents)` pairs, written with raw header
	/// names so hostile paths survive.
	pub(crate) fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
		let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
		for (name, data) in entries {
			let mut header = tar::Header::new_old();
			let raw = name.as_bytes();
			header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
			header.set_size(data.len() as u64);
			header.set_mode(0o644);
			header.set_entry_type(EntryType::Regular);
			header.set_cksum();
			builder.append(&header, Cursor::new(*data)).unwrap();
		}
		builder.into_inner().unwrap().finish().unwrap()
	}

	pub(crate) fn zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
		let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
		let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
		for (name, data) in entries {
			writer.start_file(*name, options).unwrap();
			writer.write_all(data).unwrap();
		}
		writer.finish().unwrap().into_inner()
	}

	pub(crate) fn list_tar_gz(path: &Path) -> Vec<(String, Vec<u8>)> {
		let mut tar = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
		let mut out = Vec::new();
		for entry in tar.entries().unwrap() {
			let mut entry = entry.unwrap();
			let name = entry.path().unwrap().to_string_lossy().into_owned();
			let mut data = Vec::new();
			io::Read::read_to_end(&mut entry, &mut data).unwrap();
			out.push((name, data));
		}
		out
	}
}
