// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs registered with the scheduler at startup.

mod job_history_cleanup;
mod mirror_sync;
mod tag_immutability;

pub use job_history_cleanup::JobHistoryCleanupJob;
pub use mirror_sync::MirrorSyncJob;
pub use tag_immutability::TagImmutabilityJob;
