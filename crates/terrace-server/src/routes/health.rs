// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use terrace_server_jobs::{HealthState, JobsHealthStatus};

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthState,
	pub version: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub jobs: Option<JobsHealthStatus>,
}

/// GET /health
///
/// 503 once any background job is unhealthy.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let jobs = match &state.job_scheduler {
		Some(scheduler) => Some(scheduler.health_status().await),
		None => None,
	};
	let status = jobs.as_ref().map(|j| j.status).unwrap_or(HealthState::Healthy);

	let code = if status == HealthState::Unhealthy {
		StatusCode::SERVICE_UNAVAILABLE
	} else {
		StatusCode::OK
	};

	(
		code,
		Json(HealthResponse {
			status,
			version: env!("CARGO_PKG_VERSION"),
			jobs,
		}),
	)
}
