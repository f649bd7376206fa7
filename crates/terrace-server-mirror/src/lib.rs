// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider mirroring from upstream Terraform registries.
//!
//! [`MirrorSyncEngine`] is the entry point: `trigger_sync` runs one mirror now,
//! `sync_due` runs every mirror whose interval has elapsed, and `get_status`
//! reports the latest runs. Packages are only stored after their SHA-256 and
//! the upstream's OpenPGP signature over `SHA256SUMS` both check out.

pub mod checksum;
pub mod error;
pub mod filter;
pub mod hash;
pub mod policy;
pub mod signature;
pub mod sync;
pub mod upstream;

pub use checksum::ShaSums;
pub use error::{MirrorError, Result};
pub use filter::{NameFilter, PlatformFilter, VersionFilter};
pub use policy::{approval_satisfies, evaluate, PolicyDecision};
pub use sync::{
	ArtifactOutcome, ArtifactResult, MirrorStatus, MirrorSyncEngine, SkippedProvider, SyncReport, SyncSettings,
	SyncTarget,
};
pub use upstream::{PackageInfo, UpstreamClient};
