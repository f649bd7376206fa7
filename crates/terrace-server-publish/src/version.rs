// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tag name to module version extraction.

use regex::Regex;

use crate::error::{PublishError, Result};

/// A compiled link tag glob such as `v*` or `release-*`.
///
/// The first `*` captures the version segment; further `*` and `?` match
/// without capturing. An empty pattern behaves like `*`.
#[derive(Debug, Clone)]
pub struct TagPattern {
	glob: String,
	regex: Regex,
}

impl TagPattern {
	pub fn new(glob: &str) -> Result<Self> {
		let glob = glob.trim();
		let effective = if glob.is_empty() { "*" } else { glob };

		let mut pattern = String::from("^");
		let mut captured = false;
		for c in effective.chars() {
			match c {
				'*' if !captured => {
					pattern.push_str("(.+)");
					captured = true;
				}
				'*' => pattern.push_str(".*"),
				'?' => pattern.push('.'),
				other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
			}
		}
		if !captured {
			return Err(PublishError::InvalidTagPattern(glob.to_string()));
		}
		pattern.push('$');

		let regex = Regex::new(&pattern).map_err(|_| PublishError::InvalidTagPattern(glob.to_string()))?;
		Ok(Self {
			glob: glob.to_string(),
			regex,
		})
	}

	pub fn as_str(&self) -> &str {
		&self.glob
	}

	pub fn matches(&self, tag: &str) -> bool {
		self.regex.is_match(tag)
	}

	/// The version for `tag`, or `None` when the tag does not match the glob
	/// or the captured segment is not strict semver.
	pub fn extract(&self, tag: &str) -> Option<String> {
		let captured = self.regex.captures(tag)?.get(1)?.as_str();
		let candidate = captured.strip_prefix('v').unwrap_or(captured);
		semver::Version::parse(candidate).ok().map(|v| v.to_string())
	}
}

/// Extract a strict semver version from `tag` using the link's glob.
pub fn extract_version(glob: &str, tag: &str) -> Result<String> {
	TagPattern::new(glob)?
		.extract(tag)
		.ok_or_else(|| PublishError::VersionExtraction { tag: tag.to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_v_prefix_glob() {
		assert_eq!(extract_version("v*", "v1.2.3").unwrap(), "1.2.3");
	}

	#[test]
	fn test_release_prefix_with_prerelease() {
		assert_eq!(extract_version("release-*", "release-2.0.0-beta.1").unwrap(), "2.0.0-beta.1");
	}

	#[test]
	fn test_bare_glob_strips_leading_v() {
		assert_eq!(extract_version("*", "v0.4.0+build.7").unwrap(), "0.4.0+build.7");
		assert_eq!(extract_version("", "3.1.4").unwrap(), "3.1.4");
	}

	#[test]
	fn test_non_matching_or_non_semver_tags() {
		for (glob, tag) in [
			("v*", "release-1.0.0"),
			("v*", "v1.2"),
			("v*", "v01.2.3"),
			("v*", "vlatest"),
			("release-*", "release-"),
			("v*", "xv1.0.0"),
		] {
			let err = extract_version(glob, tag).unwrap_err();
			assert!(
				matches!(err, PublishError::VersionExtraction { .. }),
				"{glob} / {tag} should not yield a version"
			);
		}
	}

	#[test]
	fn test_regex_metacharacters_are_literal() {
		let pattern = TagPattern::new("mod.vpc/v*").unwrap();
		assert!(pattern.matches("mod.vpc/v1.0.0"));
		assert!(!pattern.matches("modXvpc/v1.0.0"));
		assert_eq!(pattern.extract("mod.vpc/v1.0.0").as_deref(), Some("1.0.0"));
	}

	#[test]
	fn test_pattern_without_wildcard_is_invalid() {
		assert!(matches!(TagPattern::new("v1.0.0"), Err(PublishError::InvalidTagPattern(_))));
	}

	#[test]
	fn test_question_mark_matches_one_char() {
		let pattern = TagPattern::new("?-*").unwrap();
		assert_eq!(pattern.extract("a-1.0.0").as_deref(), Some("1.0.0"));
		assert_eq!(pattern.extract("ab-1.0.0"), None);
	}
}
