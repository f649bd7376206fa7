// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence for the terrace ingestion pipeline.
//!
//! Each aggregate has a `*Store` trait used by the pipeline crates and a
//! SQLite `*Repository` implementing it. Uniqueness invariants (one link per
//! module, one record per artifact version) are enforced by the schema and
//! surface as [`DbError::Conflict`].

pub mod delivery;
pub mod error;
pub mod job;
pub mod mirror;
pub mod pool;
pub mod registry;
mod row;
pub mod scm;
pub mod testing;

pub use delivery::{
	DeliveryRepository, DeliveryState, ImmutabilityViolation, ImmutabilityViolationStore,
	WebhookDeliveryLog, WebhookLogStore,
};
pub use error::{DbError, Result};
pub use job::{JobDefinition, JobRepository, JobRun, JobStatus, JobStore, TriggerSource};
pub use mirror::{
	ApprovalStatus, MirrorApprovalRequest, MirrorConfig, MirrorPolicy, MirrorRepository,
	MirrorStore, MirrorSyncHistory, MirroredProvider, MirroredProviderVersion, PolicyType,
	SyncOutcome, SyncStatus,
};
pub use pool::{create_pool, run_migrations};
pub use registry::{
	Module, ModuleStore, ModuleVersion, Provider, ProviderPlatform, ProviderStore, ProviderVersion,
	RegistryRepository,
};
pub use scm::{
	LinkWebhookUpdate, OAuthTokenRecord, OAuthTokenStore, RepositoryLink, RepositoryLinkStore,
	ScmKind, ScmProviderConfig, ScmProviderStore, ScmRepository,
};
