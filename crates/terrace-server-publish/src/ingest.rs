// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Receiving side of SCM webhooks: authenticate, log, and hand off.

use std::collections::BTreeMap;

use chrono::Utc;
use http::HeaderMap;
use terrace_common_secret::SecretString;
use terrace_server_db::{DeliveryState, RepositoryLink, WebhookDeliveryLog};
use terrace_server_scm::{signature_header, IncomingHook};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::IngestionContext;
use crate::error::IngestError;
use crate::queue::{PublishJob, PublishQueue};

/// Headers never copied into the delivery log.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
	pub log_id: Uuid,
	/// A publish job was queued for this delivery.
	pub dispatched: bool,
	/// Earlier log for the same provider delivery id, if any.
	pub replay_of: Option<Uuid>,
}

#[derive(Clone)]
pub struct WebhookIngestor {
	ctx: IngestionContext,
	queue: PublishQueue,
}

impl WebhookIngestor {
	pub fn new(ctx: IngestionContext, queue: PublishQueue) -> Self {
		Self { ctx, queue }
	}

	/// Handle one delivery addressed to `/webhooks/scm/{link_id}/{path_secret}`.
	///
	/// Returns once the delivery log row exists; publishing continues on the
	/// queue. Signature and payload rejections persist nothing.
	#[instrument(skip(self, path_secret, body, headers), fields(link_id = %link_id, bytes = body.len()))]
	pub async fn receive(
		&self,
		link_id: Uuid,
		path_secret: &str,
		body: &[u8],
		headers: &HeaderMap,
	) -> Result<IngestOutcome, IngestError> {
		debug!(state = %DeliveryState::Received, "webhook received");
		let link = self.ctx.links.get_link(link_id).await?.ok_or(IngestError::NotFound)?;
		if !link.webhook_enabled {
			return Err(IngestError::NotFound);
		}
		let secret = self.check_path_secret(&link, path_secret)?;

		let provider = self.ctx.provider(link.provider_id).await?;
		let connector = self.ctx.connector_for(&provider)?;

		debug!(state = %DeliveryState::Verifying, kind = %provider.kind.as_str(), "verifying delivery");
		let signature_name = signature_header(provider.kind);
		let signature = headers
			.get(signature_name)
			.and_then(|v| v.to_str().ok())
			.map(str::trim)
			.unwrap_or_default();
		if signature.is_empty() || !connector.verify_delivery_signature(body, signature, secret.expose()) {
			warn!(header = signature_name, "rejected webhook with invalid signature");
			return Err(IngestError::InvalidSignature);
		}

		let hook = connector
			.parse_delivery(body, headers)
			.map_err(|e| IngestError::InvalidPayload(e.to_string()))?;

		let previous = self.ctx.logs.find_by_event_id(link.id, &hook.id).await?;
		let log = delivery_log(&link, &hook, headers, signature_name, signature);
		self.ctx.logs.create_log(&log).await?;
		info!(
			log_id = %log.id,
			event_id = %hook.id,
			event_type = %hook.event_type,
			tag = ?hook.tag_name,
			state = %DeliveryState::Logged,
			"webhook delivery logged"
		);

		let mut outcome = IngestOutcome {
			log_id: log.id,
			dispatched: false,
			replay_of: previous.as_ref().map(|p| p.id),
		};

		if !(hook.is_tag_event() && link.auto_publish) {
			return Ok(outcome);
		}
		if previous.is_some_and(|p| p.state == DeliveryState::Completed) {
			info!(log_id = %log.id, "replayed delivery already published, not dispatching");
			return Ok(outcome);
		}

		let job = PublishJob {
			link_id: link.id,
			log_id: log.id,
			hook,
		};
		match self.queue.try_dispatch(job) {
			Ok(()) => outcome.dispatched = true,
			Err(e) => {
				let message = e.to_string();
				warn!(log_id = %log.id, error = %message, "could not queue publish");
				self
					.ctx
					.logs
					.update_state(log.id, DeliveryState::Failed, None, Some(&message))
					.await?;
			}
		}

		Ok(outcome)
	}

	/// The link's webhook secret, which both addresses the delivery URL and
	/// keys the payload signature.
	fn check_path_secret(&self, link: &RepositoryLink, presented: &str) -> Result<SecretString, IngestError> {
		let sealed = link
			.webhook_secret_sealed
			.as_deref()
			.filter(|s| !s.is_empty())
			.ok_or(IngestError::NotFound)?;
		let expected = self.ctx.open_secret(sealed, "webhook secret")?;
		if terrace_common_webhook::verify_token(expected.expose(), presented) {
			Ok(expected)
		} else {
			Err(IngestError::NotFound)
		}
	}
}

fn delivery_log(
	link: &RepositoryLink,
	hook: &IncomingHook,
	headers: &HeaderMap,
	signature_name: &str,
	signature: &str,
) -> WebhookDeliveryLog {
	WebhookDeliveryLog {
		id: Uuid::new_v4(),
		link_id: link.id,
		event_id: hook.id.clone(),
		event_type: hook.event_type.clone(),
		git_ref: hook.git_ref.clone(),
		commit_sha: hook.commit_sha.clone(),
		tag_name: hook.tag_name.clone(),
		payload: hook.payload.clone(),
		headers: header_snapshot(headers, signature_name),
		// token-style headers carry the secret itself
		signature: signature
			.starts_with(terrace_common_webhook::SHA256_PREFIX)
			.then(|| signature.to_string()),
		signature_valid: true,
		state: DeliveryState::Logged,
		version_id: None,
		error: None,
		received_at: Utc::now(),
		processed_at: None,
	}
}

fn header_snapshot(headers: &HeaderMap, signature_name: &str) -> BTreeMap<String, String> {
	headers
		.iter()
		.filter(|(name, _)| {
			!name.as_str().eq_ignore_ascii_case(signature_name) && !REDACTED_HEADERS.contains(&name.as_str())
		})
		.filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
		.collect()
}
