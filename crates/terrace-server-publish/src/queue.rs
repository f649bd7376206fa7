// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded background queue between webhook ingestion and publishing.
//!
//! The webhook handler only ever calls [`PublishQueue::try_dispatch`], which
//! never waits. A single worker drains the channel and runs at most
//! `max_concurrent` publishes at once; a full channel is reported back to the
//! caller instead of growing without bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use terrace_server_db::DeliveryState;
use terrace_server_scm::IncomingHook;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::IngestionContext;
use crate::error::Result;
use crate::publisher::Publisher;

#[derive(Debug, Clone)]
pub struct PublishJob {
	pub link_id: Uuid,
	pub log_id: Uuid,
	pub hook: IncomingHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
	#[error("publish queue is full")]
	Full,
	#[error("publish queue is shut down")]
	Closed,
}

#[async_trait]
pub trait PublishHandler: Send + Sync + 'static {
	async fn handle(&self, job: PublishJob);

	/// Called for an accepted job that will never run because the worker
	/// is stopping.
	async fn abandon(&self, job: PublishJob, reason: &str);
}

#[derive(Clone)]
pub struct PublishQueue {
	tx: mpsc::Sender<PublishJob>,
}

impl PublishQueue {
	/// Spawn the worker. It stops taking jobs once `shutdown` fires and
	/// returns after in-flight publishes finish.
	pub fn start(
		handler: Arc<dyn PublishHandler>,
		capacity: usize,
		max_concurrent: usize,
		shutdown: CancellationToken,
	) -> (Self, JoinHandle<()>) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		let worker = tokio::spawn(run_worker(rx, handler, max_concurrent.max(1), shutdown));
		(Self { tx }, worker)
	}

	pub fn try_dispatch(&self, job: PublishJob) -> std::result::Result<(), DispatchError> {
		self.tx.try_send(job).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => DispatchError::Full,
			mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
		})
	}
}

async fn run_worker(
	mut rx: mpsc::Receiver<PublishJob>,
	handler: Arc<dyn PublishHandler>,
	max_concurrent: usize,
	shutdown: CancellationToken,
) {
	let permits = Arc::new(Semaphore::new(max_concurrent));
	let mut tasks = JoinSet::new();
	info!(max_concurrent, "publish worker started");

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
				if let Err(e) = joined {
					warn!(error = %e, "publish task panicked");
				}
			}
			job = rx.recv() => {
				let Some(job) = job else { break };
				let permit = tokio::select! {
					_ = shutdown.cancelled() => None,
					permit = permits.clone().acquire_owned() => permit.ok(),
				};
				let Some(permit) = permit else {
					handler.abandon(job, &DispatchError::Closed.to_string()).await;
					break;
				};
				let handler = handler.clone();
				debug!(log_id = %job.log_id, "publish job started");
				tasks.spawn(async move {
					handler.handle(job).await;
					drop(permit);
				});
			}
		}
	}

	rx.close();
	let reason = DispatchError::Closed.to_string();
	let mut abandoned = 0usize;
	while let Ok(job) = rx.try_recv() {
		handler.abandon(job, &reason).await;
		abandoned += 1;
	}
	if abandoned > 0 {
		warn!(abandoned, "queued publishes dropped at shutdown");
	}

	let in_flight = tasks.len();
	if in_flight > 0 {
		info!(in_flight, "waiting for in-flight publishes");
	}
	while let Some(joined) = tasks.join_next().await {
		if let Err(e) = joined {
			warn!(error = %e, "publish task panicked");
		}
	}
	info!("publish worker stopped");
}

/// Resolves credentials for a job and runs the [`Publisher`].
pub struct PublishPipeline {
	ctx: IngestionContext,
	publisher: Publisher,
}

impl PublishPipeline {
	pub fn new(ctx: IngestionContext, publisher: Publisher) -> Self {
		Self { ctx, publisher }
	}

	pub fn from_context(ctx: IngestionContext, scratch_parent: Option<std::path::PathBuf>, download_timeout: Duration) -> Self {
		let publisher = Publisher::new(&ctx)
			.with_scratch_parent(scratch_parent)
			.with_download_timeout(download_timeout);
		Self::new(ctx, publisher)
	}

	async fn run(&self, job: &PublishJob) -> Result<()> {
		let link = self.ctx.link(job.link_id).await?;
		let provider = self.ctx.provider(link.provider_id).await?;
		let connector = self.ctx.connector_for(&provider)?;
		let token = self.ctx.access_token_for(&link, &provider, connector.as_ref()).await?;
		self
			.publisher
			.publish(connector.as_ref(), &token, &link, &job.hook, job.log_id)
			.await?;
		Ok(())
	}
}

#[async_trait]
impl PublishHandler for PublishPipeline {
	#[instrument(skip(self, job), fields(link_id = %job.link_id, log_id = %job.log_id))]
	async fn handle(&self, job: PublishJob) {
		let Err(e) = self.run(&job).await else {
			return;
		};

		// The publisher records its own failures; this covers errors raised
		// while resolving the link, provider or credentials.
		let message = e.to_string();
		if self.mark_failed(job.log_id, &message).await {
			warn!(error = %message, "publish could not start");
		}
	}

	#[instrument(skip(self, job), fields(link_id = %job.link_id, log_id = %job.log_id))]
	async fn abandon(&self, job: PublishJob, reason: &str) {
		if self.mark_failed(job.log_id, reason).await {
			warn!(reason = %reason, "publish abandoned");
		}
	}
}

impl PublishPipeline {
	/// Fail a delivery log that has not reached a terminal state. Returns
	/// whether the log was updated.
	async fn mark_failed(&self, log_id: Uuid, message: &str) -> bool {
		let log = match self.ctx.logs.get_log(log_id).await {
			Ok(log) => log,
			Err(db) => {
				warn!(error = %db, "failed to load delivery log");
				return false;
			}
		};
		if !log.is_some_and(|l| !l.state.is_terminal()) {
			return false;
		}
		match self
			.ctx
			.logs
			.update_state(log_id, DeliveryState::Failed, None, Some(message))
			.await
		{
			Ok(()) => true,
			Err(db) => {
				warn!(error = %db, "failed to record publish failure");
				false
			}
		}
	}
}
