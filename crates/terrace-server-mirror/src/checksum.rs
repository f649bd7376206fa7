// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{MirrorError, Result};

/// Parsed `SHA256SUMS` document: `<hex>  <filename>` or `<hex> *<filename>` per line.
#[derive(Debug, Clone, Default)]
pub struct ShaSums {
	entries: HashMap<String, String>,
}

impl ShaSums {
	pub fn parse(text: &str) -> Result<Self> {
		let mut entries = HashMap::new();
		for (index, line) in text.lines().enumerate() {
			let line = line.trim_end_matches('\r');
			if line.trim().is_empty() {
				continue;
			}
			let (hash, name) = line.split_once(' ').ok_or_else(|| malformed(index, "missing filename"))?;
			let name = name.strip_prefix(' ').or_else(|| name.strip_prefix('*')).unwrap_or(name);
			let name = name.strip_prefix('*').unwrap_or(name);

			if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
				return Err(malformed(index, "checksum is not 64 hex digits"));
			}
			if name.is_empty() {
				return Err(malformed(index, "missing filename"));
			}
			entries.insert(name.to_string(), hash.to_ascii_lowercase());
		}
		Ok(Self { entries })
	}

	pub fn get(&self, filename: &str) -> Option<&str> {
		self.entries.get(filename).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn malformed(index: usize, message: &str) -> MirrorError {
	MirrorError::InvalidResponse {
		operation: "shasums",
		message: format!("line {}: {message}", index + 1),
	}
}

pub fn sha256_hex(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}

/// Compare hex digests ignoring case; mismatches become [`MirrorError::ChecksumMismatch`].
pub fn ensure_matches(filename: &str, expected: &str, actual: &str) -> Result<()> {
	if expected.eq_ignore_ascii_case(actual) {
		Ok(())
	} else {
		Err(MirrorError::ChecksumMismatch {
			filename: filename.to_string(),
			expected: expected.to_ascii_lowercase(),
			actual: actual.to_ascii_lowercase(),
		})
	}
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn parses_every_written_entry(
			entries in proptest::collection::hash_map("[a-z0-9_.-]{1,40}", any::<[u8; 32]>(), 0..10),
			binary in any::<bool>(),
		) {
			let separator = if binary { " *" } else { "  " };
			let text: String = entries
				.iter()
				.map(|(name, digest)| format!("{}{separator}{name}\n", hex::encode(digest)))
				.collect();
			let sums = ShaSums::parse(&text).unwrap();
			prop_assert_eq!(sums.len(), entries.len());
			for (name, digest) in &entries {
				let expected = hex::encode(digest);
				prop_assert_eq!(sums.get(name), Some(expected.as_str()));
			}
		}
	}
}
