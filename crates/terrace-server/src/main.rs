// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! terrace registry server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use terrace_server::jobs::{JobHistoryCleanupJob, MirrorSyncJob, TagImmutabilityJob};
use terrace_server::{create_app_state, create_router};
use terrace_server_config::LogFormat;
use terrace_server_jobs::{CancellationToken, JobScheduler};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// terrace server - registry ingestion, publishing and mirroring.
#[derive(Parser, Debug)]
#[command(name = "terrace-server", about = "terrace registry server", version)]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	if let Some(Command::Version) = args.command {
		println!("terrace-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = terrace_server_config::load_config()?;

	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		"starting terrace-server"
	);

	let pool = terrace_server_db::create_pool(&config.database.url).await?;
	terrace_server_db::run_migrations(&pool).await?;

	let shutdown = CancellationToken::new();
	let (mut state, publish_worker) = create_app_state(pool, &config, shutdown.clone()).await?;

	let mut scheduler = JobScheduler::with_shutdown(state.job_repository.clone(), shutdown.child_token());

	if config.mirror.enabled {
		scheduler.register_periodic(
			Arc::new(MirrorSyncJob::new(Arc::clone(&state.mirror_engine))),
			Duration::from_secs(config.mirror.tick_interval_secs),
		);
	}

	if config.jobs.immutability_check_enabled {
		scheduler.register_periodic(
			Arc::new(TagImmutabilityJob::new(
				state.ingestion.clone(),
				Arc::clone(&state.violations),
			)),
			Duration::from_secs(config.jobs.immutability_check_interval_secs),
		);
	}

	scheduler.register_periodic(
		Arc::new(JobHistoryCleanupJob::new(
			state.job_repository.clone(),
			config.jobs.history_retention_days,
		)),
		Duration::from_secs(24 * 60 * 60),
	);

	let scheduler = Arc::new(scheduler);
	state.job_scheduler = Some(Arc::clone(&scheduler));

	if let Err(e) = scheduler.start().await {
		tracing::error!(error = %e, "failed to start job scheduler");
	}

	let app = create_router(state).layer(TraceLayer::new_for_http()).layer(
		CorsLayer::new()
			.allow_origin(Any)
			.allow_methods(Any)
			.allow_headers(Any),
	);

	let addr = config.socket_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	tracing::info!(%addr, "listening");

	let signal = shutdown.clone();
	axum::serve(listener, app)
		.with_graceful_shutdown(async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "failed to listen for shutdown signal");
			}
			tracing::info!("received shutdown signal");
			signal.cancel();
		})
		.await?;

	shutdown.cancel();
	tracing::info!("stopping job scheduler");
	scheduler.shutdown().await;
	if let Err(e) = publish_worker.await {
		tracing::warn!(error = %e, "publish queue worker ended abnormally");
	}

	tracing::info!("server shutdown complete");
	Ok(())
}
