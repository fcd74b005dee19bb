// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `wg-feed-daemon`: apply every configured feed and keep reconciling
//! until SIGINT/SIGTERM.

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wgfeed_client::ClientConfig;

#[tokio::main]
async fn main() {
	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config = match ClientConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!(error = %e, "config error");
			std::process::exit(1);
		}
	};

	let shutdown = shutdown_channel();
	if let Err(e) = wgfeed_client::run_daemon(config, shutdown).await {
		error!(error = %e, "run error");
		std::process::exit(1);
	}
	info!("daemon stopped");
}

/// Flips to true on SIGINT or SIGTERM. Every task sleep and in-flight
/// request races against this receiver.
fn shutdown_channel() -> watch::Receiver<bool> {
	let (tx, rx) = watch::channel(false);
	tokio::spawn(async move {
		let ctrl_c = tokio::signal::ctrl_c();
		#[cfg(unix)]
		{
			let mut terminate =
				tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
					.expect("failed to install SIGTERM handler");
			tokio::select! {
				_ = ctrl_c => {}
				_ = terminate.recv() => {}
			}
		}
		#[cfg(not(unix))]
		{
			let _ = ctrl_c.await;
		}
		info!("shutdown signal received");
		let _ = tx.send(true);
	});
	rx
}
