// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{
	body::Bytes,
	extract::{Path, State},
	response::IntoResponse,
	Json,
};
use serde::{Deserialize, Serialize};
use terrace_server_mirror::{MirrorError, SyncReport, SyncTarget};
use uuid::Uuid;

use crate::api::AppState;
use crate::api_response::{bad_request, conflict, internal_error, not_found, ApiError};

/// Optional narrowing of a manual sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
	#[serde(default)]
	pub namespace: Option<String>,
	#[serde(default)]
	pub provider: Option<String>,
}

fn parse_mirror_id(raw: &str) -> Result<Uuid, ApiError> {
	Uuid::parse_str(raw).map_err(|_| bad_request("invalid_id", format!("invalid mirror id {raw:?}")))
}

/// GET /api/mirrors/{id}/status
pub async fn get_mirror_status(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
	let mirror_id = parse_mirror_id(&id)?;
	let status = state
		.mirror_engine
		.get_status(mirror_id)
		.await
		.map_err(mirror_error_response)?;
	Ok(Json(status))
}

/// POST /api/mirrors/{id}/sync
///
/// Runs the sync to completion and returns its report. The run continues
/// if the client disconnects.
pub async fn trigger_mirror_sync(
	State(state): State<AppState>,
	Path(id): Path<String>,
	body: Bytes,
) -> Result<Json<SyncReport>, ApiError> {
	let mirror_id = parse_mirror_id(&id)?;
	let request: TriggerSyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
		TriggerSyncRequest::default()
	} else {
		serde_json::from_slice(&body).map_err(|e| bad_request("invalid_body", e.to_string()))?
	};

	if state.mirror_engine.is_running(mirror_id) {
		return Err(mirror_error_response(MirrorError::AlreadyRunning(mirror_id)));
	}

	let engine = state.mirror_engine.clone();
	let cancel = state.shutdown.child_token();
	let target = SyncTarget::new(request.namespace, request.provider);
	tracing::info!(mirror_id = %mirror_id, ?target, "manual mirror sync requested");

	let run = tokio::spawn(async move { engine.trigger_sync(mirror_id, target, &cancel).await });
	let report = run
		.await
		.map_err(|e| {
			tracing::error!(mirror_id = %mirror_id, error = %e, "mirror sync task panicked");
			internal_error("mirror sync aborted")
		})?
		.map_err(mirror_error_response)?;

	Ok(Json(report))
}

pub(crate) fn mirror_error_response(e: MirrorError) -> ApiError {
	match e {
		MirrorError::NotFound(id) => not_found(format!("mirror {id} not found")),
		MirrorError::AlreadyRunning(_) => conflict("sync_in_progress", e.to_string()),
		MirrorError::InvalidFilter { .. } => bad_request("invalid_filter", e.to_string()),
		other => {
			tracing::error!(error = %other, "mirror request failed");
			internal_error("mirror request failed")
		}
	}
}
