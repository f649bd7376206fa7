// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Terraform package hashes recorded alongside mirrored platforms.

use std::io::{Read, Seek};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{MirrorError, Result};

/// `h1:` dirhash of a provider zip: base64 SHA-256 over the sorted
/// `<hex sha256>  <name>\n` lines of every file in the archive.
pub fn h1_from_zip<R: Read + Seek>(reader: R) -> Result<String> {
	let mut archive = zip::ZipArchive::new(reader).map_err(invalid_zip)?;

	let mut lines = Vec::with_capacity(archive.len());
	for index in 0..archive.len() {
		let mut entry = archive.by_index(index).map_err(invalid_zip)?;
		if entry.is_dir() {
			continue;
		}
		let name = entry.name().to_string();
		if name.contains('\n') {
			return Err(MirrorError::InvalidResponse {
				operation: "h1_hash",
				message: format!("zip entry name contains a newline: {name:?}"),
			});
		}
		let mut digest = Sha256::new();
		std::io::copy(&mut entry, &mut digest)?;
		lines.push((name, hex::encode(digest.finalize())));
	}
	lines.sort_by(|a, b| a.0.cmp(&b.0));

	let mut summary = Sha256::new();
	for (name, digest) in &lines {
		summary.update(format!("{digest}  {name}\n").as_bytes());
	}
	Ok(format!(
		"h1:{}",
		base64::engine::general_purpose::STANDARD.encode(summary.finalize())
	))
}

fn invalid_zip(e: zip::result::ZipError) -> MirrorError {
	MirrorError::InvalidResponse {
		operation: "h1_hash",
		message: e.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn test_h1_of_fixture() {
		let zip = include_bytes!("../tests/fixtures/terraform-provider-widget_1.0.0_linux_amd64.zip");
		assert_eq!(
			h1_from_zip(Cursor::new(&zip[..])).unwrap(),
			"h1:git0lUTh62O3MyhL2L+HsgwMzsVsEUlHNPzO+gEyA3E="
		);
	}

	#[test]
	fn test_h1_rejects_non_zip() {
		assert!(matches!(
			h1_from_zip(Cursor::new(b"not a zip".to_vec())),
			Err(MirrorError::InvalidResponse { .. })
		));
	}

	fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
		use std::io::Write;
		let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
		let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
		for (name, body) in files {
			writer.start_file(*name, options).unwrap();
			writer.write_all(body).unwrap();
		}
		writer.finish().unwrap().into_inner()
	}

	#[test]
	fn test_h1_sorts_entries_and_hashes_contents() {
		let large = vec![7u8; 3 * 1024 * 1024];
		let zip = zip_of(&[("b.txt", &large), ("a.txt", b"hello\n")]);

		let mut expected = Sha256::new();
		expected.update(format!("{}  a.txt\n", hex::encode(Sha256::digest(b"hello\n"))).as_bytes());
		expected.update(format!("{}  b.txt\n", hex::encode(Sha256::digest(&large))).as_bytes());
		let expected = format!(
			"h1:{}",
			base64::engine::general_purpose::STANDARD.encode(expected.finalize())
		);

		assert_eq!(h1_from_zip(Cursor::new(zip)).unwrap(), expected);
	}
}
