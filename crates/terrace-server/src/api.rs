// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use axum::{
	routing::{get, post},
	Router,
};
use sqlx::SqlitePool;
use terrace_server_config::{KeySource, ServerConfig};
use terrace_server_crypto::CredentialCipher;
use terrace_server_db::{
	DeliveryRepository, ImmutabilityViolationStore, JobRepository, MirrorRepository, RegistryRepository,
	ScmRepository,
};
use terrace_server_jobs::JobScheduler;
use terrace_server_mirror::{MirrorSyncEngine, SyncSettings};
use terrace_server_publish::{IngestionContext, PublishPipeline, PublishQueue, WebhookIngestor};
use terrace_server_scm::{ConnectorDefaults, ConnectorRegistry};
use terrace_server_storage::LocalStorage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::routes;

#[derive(Clone)]
pub struct AppState {
	pub ingestion: IngestionContext,
	pub ingestor: Arc<WebhookIngestor>,
	pub mirror_engine: Arc<MirrorSyncEngine>,
	pub violations: Arc<dyn ImmutabilityViolationStore>,
	pub job_repository: Arc<JobRepository>,
	pub job_scheduler: Option<Arc<JobScheduler>>,
	/// Root token; manual mirror runs and the publish queue hang off it.
	pub shutdown: CancellationToken,
}

/// Build the credential cipher from the configured key material.
pub fn build_cipher(key: &KeySource) -> Result<CredentialCipher, ServerError> {
	let cipher = match key {
		KeySource::Raw(encoded) => CredentialCipher::from_encoded(encoded.expose())?,
		KeySource::Passphrase {
			passphrase,
			salt,
			iterations,
		} => CredentialCipher::derive(passphrase.expose(), salt.as_bytes(), *iterations)?,
	};
	Ok(cipher)
}

/// Wire repositories, connectors, storage and the publish queue.
///
/// Returns the state and the publish queue worker, which exits once
/// `shutdown` is cancelled and in-flight publishes finish.
pub async fn create_app_state(
	pool: SqlitePool,
	config: &ServerConfig,
	shutdown: CancellationToken,
) -> Result<(AppState, JoinHandle<()>), ServerError> {
	let cipher = Arc::new(build_cipher(&config.crypto.key)?);

	tokio::fs::create_dir_all(&config.storage.root_dir).await?;
	let storage = Arc::new(LocalStorage::new(&config.storage.root_dir));

	let connectors = ConnectorRegistry::with_builtin(ConnectorDefaults {
		redirect_base_url: config.http.base_url.clone(),
		request_timeout: Duration::from_secs(config.scm.request_timeout_secs),
		archive_timeout: Duration::from_secs(config.scm.archive_timeout_secs),
	});

	let scm = Arc::new(ScmRepository::new(pool.clone()));
	let deliveries = Arc::new(DeliveryRepository::new(pool.clone()));
	let registry = Arc::new(RegistryRepository::new(pool.clone()));

	let ingestion = IngestionContext {
		cipher,
		connectors: Arc::new(connectors),
		providers: scm.clone(),
		tokens: scm.clone(),
		links: scm,
		logs: deliveries.clone(),
		modules: registry.clone(),
		storage: storage.clone(),
	};

	let pipeline = PublishPipeline::from_context(
		ingestion.clone(),
		config.publish.scratch_dir.clone(),
		Duration::from_secs(config.scm.archive_timeout_secs),
	);
	let (queue, worker) = PublishQueue::start(
		Arc::new(pipeline),
		config.publish.queue_capacity,
		config.publish.max_concurrent,
		shutdown.child_token(),
	);

	let settings = SyncSettings {
		request_timeout: Duration::from_secs(config.mirror.request_timeout_secs),
		download_timeout: Duration::from_secs(config.mirror.download_timeout_secs),
		approval_ttl: chrono::Duration::days(i64::from(config.mirror.approval_ttl_days)),
		scratch_parent: config.publish.scratch_dir.clone(),
	};
	let mirror_engine = MirrorSyncEngine::new(
		Arc::new(MirrorRepository::new(pool.clone())),
		registry,
		storage,
		settings,
	);

	let state = AppState {
		ingestor: Arc::new(WebhookIngestor::new(ingestion.clone(), queue)),
		ingestion,
		mirror_engine: Arc::new(mirror_engine),
		violations: deliveries,
		job_repository: Arc::new(JobRepository::new(pool)),
		job_scheduler: None,
		shutdown,
	};
	Ok((state, worker))
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route(
			"/webhooks/scm/{link_id}/{secret}",
			post(routes::webhooks::receive_webhook),
		)
		.route("/api/mirrors/{id}/status", get(routes::mirrors::get_mirror_status))
		.route("/api/mirrors/{id}/sync", post(routes::mirrors::trigger_mirror_sync))
		.with_state(state)
}
