// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! terrace registry server.
//!
//! Receives SCM webhooks and publishes module versions from them, runs
//! provider mirror syncs, and schedules the background jobs that keep both
//! honest.

pub mod api;
pub mod api_response;
pub mod error;
pub mod jobs;
pub mod routes;

pub use api::{build_cipher, create_app_state, create_router, AppState};
pub use error::ServerError;
pub use terrace_server_config::ServerConfig;
