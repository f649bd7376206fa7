// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the terrace server.
//!
//! Periodic jobs (mirror sync, tag immutability checks, run-history cleanup)
//! each get their own ticker task and a child cancellation token of the
//! scheduler's shutdown token. Runs are recorded through a
//! [`terrace_server_db::JobStore`] so health can be derived from history.

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use scheduler::JobScheduler;
pub use types::{JobDefinition, JobOutput, JobRun, JobStatus, JobType, TriggerSource};
