// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Publishing Terraform modules from linked source repositories.
//!
//! A webhook delivery is authenticated and logged by [`WebhookIngestor`],
//! queued on a bounded [`PublishQueue`], and turned into an immutable module
//! version by [`Publisher`]: version from the tag, source archive at the
//! pushed commit, safe extraction, validation, repackaging with provenance,
//! upload and record creation.

pub mod archive;
pub mod context;
pub mod error;
pub mod ingest;
pub mod publisher;
pub mod queue;
pub mod registrar;
pub mod scratch;
pub mod version;

pub use archive::{
	extract_archive, locate_module_root, provenance_manifest, repackage, safe_join, validate_module, ExtractStats,
	PackagedArchive, PROVENANCE_FILE,
};
pub use context::IngestionContext;
pub use error::{IngestError, PublishError, Result};
pub use ingest::{IngestOutcome, WebhookIngestor};
pub use publisher::{module_storage_path, Publisher, DEFAULT_DOWNLOAD_TIMEOUT};
pub use queue::{DispatchError, PublishHandler, PublishJob, PublishPipeline, PublishQueue};
pub use registrar::{generate_webhook_secret, WebhookRegistrar};
pub use scratch::ScratchDir;
pub use version::{extract_version, TagPattern};
