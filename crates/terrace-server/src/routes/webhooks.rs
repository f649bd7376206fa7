// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SCM webhook delivery endpoint.

use axum::{
	body::Bytes,
	extract::{Path, State},
	http::{HeaderMap, StatusCode},
	response::IntoResponse,
	Json,
};
use serde::{Deserialize, Serialize};
use terrace_server_publish::{IngestError, IngestOutcome};
use uuid::Uuid;

use crate::api::AppState;
use crate::api_response::{bad_request, internal_error, not_found, unauthorized, ApiError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAccepted {
	pub message: String,
	pub log_id: Uuid,
}

/// POST /webhooks/scm/{link_id}/{secret}
///
/// Answers as soon as the delivery is logged; the publish outcome is recorded
/// on the delivery log.
pub async fn receive_webhook(
	State(state): State<AppState>,
	Path((link_id, secret)): Path<(String, String)>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
	let link_id = Uuid::parse_str(&link_id).map_err(|_| not_found(IngestError::NotFound.to_string()))?;

	let outcome = state
		.ingestor
		.receive(link_id, &secret, &body, &headers)
		.await
		.map_err(ingest_error_response)?;

	Ok((
		StatusCode::OK,
		Json(WebhookAccepted {
			message: accepted_message(&outcome).to_string(),
			log_id: outcome.log_id,
		}),
	))
}

fn accepted_message(outcome: &IngestOutcome) -> &'static str {
	if outcome.dispatched {
		"webhook accepted"
	} else if outcome.replay_of.is_some() {
		"duplicate delivery logged"
	} else {
		"webhook logged"
	}
}

pub(crate) fn ingest_error_response(e: IngestError) -> ApiError {
	match e {
		IngestError::NotFound => not_found(e.to_string()),
		IngestError::InvalidSignature => unauthorized("invalid_signature", e.to_string()),
		IngestError::InvalidPayload(_) => bad_request("invalid_payload", e.to_string()),
		IngestError::Internal(detail) => {
			tracing::error!(error = %detail, "webhook ingestion failed");
			internal_error("failed to process webhook")
		}
	}
}
