// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mirror selection filters: namespaces, provider types, versions, platforms.

use std::collections::BTreeSet;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use semver::{Version, VersionReq};

use crate::error::{MirrorError, Result};

fn invalid(filter: &str, message: impl Into<String>) -> MirrorError {
	MirrorError::InvalidFilter {
		filter: filter.to_string(),
		message: message.into(),
	}
}

pub(crate) fn glob(pattern: &str) -> Result<Glob> {
	GlobBuilder::new(pattern)
		.case_insensitive(true)
		.literal_separator(false)
		.build()
		.map_err(|e| invalid(pattern, e.to_string()))
}

pub(crate) fn is_literal(pattern: &str) -> bool {
	!pattern.contains(['*', '?', '[', ']', '{', '}'])
}

/// Case-insensitive glob allow-list. Empty matches everything.
#[derive(Debug, Clone)]
pub struct NameFilter {
	patterns: Vec<String>,
	set: GlobSet,
}

impl NameFilter {
	pub fn new(patterns: &[String]) -> Result<Self> {
		let mut builder = GlobSetBuilder::new();
		let mut kept = Vec::new();
		for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
			builder.add(glob(pattern)?);
			kept.push(pattern.to_string());
		}
		let set = builder.build().map_err(|e| invalid(&patterns.join(","), e.to_string()))?;
		Ok(Self { patterns: kept, set })
	}

	pub fn matches(&self, name: &str) -> bool {
		self.patterns.is_empty() || self.set.is_match(name)
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	/// Names that can be listed directly, or `None` if any pattern is a glob.
	pub fn literals(&self) -> Option<Vec<String>> {
		self
			.patterns
			.iter()
			.map(|p| is_literal(p).then(|| p.to_ascii_lowercase()))
			.collect()
	}
}

/// `os/arch` allow-list; each side may be a glob. Empty matches everything.
#[derive(Debug, Clone)]
pub struct PlatformFilter(NameFilter);

impl PlatformFilter {
	pub fn new(entries: &[String]) -> Result<Self> {
		for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
			match entry.split_once('/') {
				Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {}
				_ => return Err(invalid(entry, "platform must be os/arch")),
			}
		}
		Ok(Self(NameFilter::new(entries)?))
	}

	pub fn matches(&self, os: &str, arch: &str) -> bool {
		self.0.matches(&format!("{os}/{arch}"))
	}
}

/// Which upstream versions a mirror copies.
#[derive(Debug, Clone)]
pub enum VersionFilter {
	All,
	/// `"3."`: string prefix.
	Prefix(String),
	/// `"latest:N"`: the N newest releases.
	Latest(usize),
	/// `"1.2.0,1.3.0"`: explicit versions.
	Exact(BTreeSet<Version>),
	/// Any other Terraform-style constraint, e.g. `">= 3.0, != 3.1.0"` or `"~> 4.2"`.
	Range(Constraint),
}

impl VersionFilter {
	pub fn parse(filter: Option<&str>) -> Result<Self> {
		let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
			return Ok(VersionFilter::All);
		};

		if let Some(count) = filter.strip_prefix("latest:") {
			let n: usize = count
				.trim()
				.parse()
				.map_err(|_| invalid(filter, "latest:N needs a positive count"))?;
			if n == 0 {
				return Err(invalid(filter, "latest:N needs a positive count"));
			}
			return Ok(VersionFilter::Latest(n));
		}

		if filter.ends_with('.') && filter.chars().all(|c| c.is_ascii_digit() || c == '.') {
			return Ok(VersionFilter::Prefix(filter.to_string()));
		}

		let parts: Vec<&str> = filter.split(',').map(str::trim).collect();
		let exact: Option<BTreeSet<Version>> = parts.iter().map(|p| parse_version(p)).collect();
		if let Some(exact) = exact {
			return Ok(VersionFilter::Exact(exact));
		}

		Ok(VersionFilter::Range(Constraint::parse(filter)?))
	}

	/// Apply the filter to upstream version strings, returning the kept
	/// versions newest first. Strings that are not semver are dropped.
	pub fn select(&self, versions: &[String]) -> Vec<String> {
		let mut parsed: Vec<(Version, &String)> = versions
			.iter()
			.filter_map(|raw| parse_version(raw).map(|v| (v, raw)))
			.collect();
		parsed.sort_by(|a, b| b.0.cmp(&a.0));
		parsed.dedup_by(|a, b| a.0 == b.0);

		let kept: Vec<&String> = match self {
			VersionFilter::All => parsed.iter().map(|(_, raw)| *raw).collect(),
			VersionFilter::Prefix(prefix) => parsed
				.iter()
				.filter(|(v, _)| v.to_string().starts_with(prefix.as_str()))
				.map(|(_, raw)| *raw)
				.collect(),
			VersionFilter::Latest(n) => parsed
				.iter()
				.filter(|(v, _)| v.pre.is_empty())
				.take(*n)
				.map(|(_, raw)| *raw)
				.collect(),
			VersionFilter::Exact(set) => parsed
				.iter()
				.filter(|(v, _)| set.contains(v))
				.map(|(_, raw)| *raw)
				.collect(),
			VersionFilter::Range(constraint) => parsed
				.iter()
				.filter(|(v, _)| constraint.matches(v))
				.map(|(_, raw)| *raw)
				.collect(),
		};
		kept.into_iter().cloned().collect()
	}
}

fn parse_version(raw: &str) -> Option<Version> {
	Version::parse(raw.trim().trim_start_matches('v')).ok()
}

/// Terraform version constraint translated to a semver requirement.
///
/// `~>` pins every component but the last one given; `!=` is kept as an
/// exclusion list since semver requirements cannot express it; a bare
/// version means equality.
#[derive(Debug, Clone)]
pub struct Constraint {
	req: VersionReq,
	excluded: Vec<Version>,
}

impl Constraint {
	pub fn parse(filter: &str) -> Result<Self> {
		let mut comparators = Vec::new();
		let mut excluded = Vec::new();

		for part in filter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
			if let Some(rest) = part.strip_prefix("~>") {
				comparators.extend(pessimistic(rest.trim()).ok_or_else(|| invalid(filter, format!("bad ~> operand {rest:?}")))?);
			} else if let Some(rest) = part.strip_prefix("!=") {
				excluded.push(
					parse_version(rest).ok_or_else(|| invalid(filter, format!("bad != operand {rest:?}")))?,
				);
			} else if part.starts_with(['>', '<', '=']) {
				comparators.push(part.replace(' ', ""));
			} else {
				comparators.push(format!("={part}"));
			}
		}

		let req = if comparators.is_empty() {
			VersionReq::STAR
		} else {
			VersionReq::parse(&comparators.join(", ")).map_err(|e| invalid(filter, e.to_string()))?
		};
		Ok(Self { req, excluded })
	}

	pub fn matches(&self, version: &Version) -> bool {
		self.req.matches(version) && !self.excluded.contains(version)
	}
}

fn pessimistic(operand: &str) -> Option<Vec<String>> {
	let operand = operand.trim_start_matches('v');
	let (core, pre) = match operand.split_once('-') {
		Some((core, pre)) => (core, Some(pre)),
		None => (operand, None),
	};
	let parts: Vec<u64> = core.split('.').map(|p| p.parse().ok()).collect::<Option<_>>()?;
	let (lower, upper) = match parts.as_slice() {
		[major] => (format!("{major}.0.0"), format!("{}.0.0", major.checked_add(1)?)),
		[major, minor] => (format!("{major}.{minor}.0"), format!("{}.0.0", major.checked_add(1)?)),
		[major, minor, patch] => (
			format!("{major}.{minor}.{patch}"),
			format!("{major}.{}.0", minor.checked_add(1)?),
		),
		_ => return None,
	};
	let lower = match pre {
		Some(pre) => format!("{lower}-{pre}"),
		None => lower,
	};
	Some(vec![format!(">={lower}"), format!("<{upper}")])
}

#[cfg(test)]
mod tests {
	use super::*;

	fn versions() -> Vec<String> {
		["2.8.0", "3.0.0", "2.9.0"].iter().map(|s| s.to_string()).collect()
	}

	fn select(filter: &str) -> Vec<String> {
		VersionFilter::parse(Some(filter)).unwrap().select(&versions())
	}

	#[test]
	fn test_latest_n() {
		assert_eq!(select("latest:2"), vec!["3.0.0", "2.9.0"]);
		assert_eq!(select("latest:10").len(), 3);
	}

	#[test]
	fn test_prefix() {
		assert_eq!(select("3."), vec!["3.0.0"]);
		assert_eq!(select("2."), vec!["2.9.0", "2.8.0"]);
	}

	#[test]
	fn test_range() {
		assert_eq!(select(">=3.0.0"), vec!["3.0.0"]);
		assert_eq!(select(">= 2.9, < 3.0"), vec!["2.9.0"]);
		assert_eq!(select(">=2.0.0, != 2.9.0"), vec!["3.0.0", "2.8.0"]);
	}

	#[test]
	fn test_explicit_list() {
		assert_eq!(select("2.8.0, 3.0.0"), vec!["3.0.0", "2.8.0"]);
		assert_eq!(select("2.9.0"), vec!["2.9.0"]);
	}

	#[test]
	fn test_absent_filter_selects_everything_newest_first() {
		let all = VersionFilter::parse(None).unwrap().select(&versions());
		assert_eq!(all, vec!["3.0.0", "2.9.0", "2.8.0"]);
		assert!(matches!(VersionFilter::parse(Some("  ")).unwrap(), VersionFilter::All));
	}

	#[test]
	fn test_pessimistic_operator() {
		let list: Vec<String> = ["4.1.0", "4.2.0", "4.2.7", "4.3.0", "5.0.0"]
			.iter()
			.map(|s| s.to_string())
			.collect();
		let two_part = VersionFilter::parse(Some("~> 4.2")).unwrap().select(&list);
		assert_eq!(two_part, vec!["4.3.0", "4.2.7", "4.2.0"]);
		let three_part = VersionFilter::parse(Some("~> 4.2.0")).unwrap().select(&list);
		assert_eq!(three_part, vec!["4.2.7", "4.2.0"]);
	}

	#[test]
	fn test_latest_skips_prereleases_and_junk() {
		let list: Vec<String> = ["1.0.0", "1.1.0-beta.1", "not-a-version", "v0.9.0"]
			.iter()
			.map(|s| s.to_string())
			.collect();
		assert_eq!(
			VersionFilter::parse(Some("latest:2")).unwrap().select(&list),
			vec!["1.0.0", "v0.9.0"]
		);
	}

	#[test]
	fn test_invalid_filters() {
		for bad in ["latest:0", "latest:x", "~> banana", ">= what", "!= 1.x"] {
			assert!(
				matches!(VersionFilter::parse(Some(bad)), Err(MirrorError::InvalidFilter { .. })),
				"{bad} should be rejected"
			);
		}
	}

	#[test]
	fn test_pessimistic_at_integer_limit_is_rejected() {
		for bad in [
			"~> 18446744073709551615",
			"~> 18446744073709551615.2",
			"~> 1.18446744073709551615.0",
		] {
			assert!(
				matches!(VersionFilter::parse(Some(bad)), Err(MirrorError::InvalidFilter { .. })),
				"{bad} should be rejected"
			);
		}
	}

	#[test]
	fn test_name_filter() {
		let filter = NameFilter::new(&["hashicorp".to_string(), "acme-*".to_string()]).unwrap();
		assert!(filter.matches("hashicorp"));
		assert!(filter.matches("HashiCorp"));
		assert!(filter.matches("acme-labs"));
		assert!(!filter.matches("other"));
		assert_eq!(filter.literals(), None);

		let literal = NameFilter::new(&["HashiCorp".to_string()]).unwrap();
		assert_eq!(literal.literals(), Some(vec!["hashicorp".to_string()]));
		assert!(NameFilter::new(&[]).unwrap().matches("anything"));
	}

	#[test]
	fn test_platform_filter() {
		let filter = PlatformFilter::new(&["linux/amd64".to_string(), "darwin/*".to_string()]).unwrap();
		assert!(filter.matches("linux", "amd64"));
		assert!(filter.matches("darwin", "arm64"));
		assert!(!filter.matches("linux", "arm64"));
		assert!(PlatformFilter::new(&[]).unwrap().matches("windows", "386"));
		assert!(PlatformFilter::new(&["linux".to_string()]).is_err());
		assert!(PlatformFilter::new(&["linux/amd64/extra".to_string()]).is_err());
	}
}
