// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `wg-feed-apply`: fetch every configured feed once, reconcile, exit.

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

	tokio::select! {
		result = wgfeed_client::run_once(&config) => {
			if let Err(e) = result {
				error!(error = %e, "run error");
				std::process::exit(1);
			}
		}
		_ = shutdown_requested() => {
			info!("shutdown signal received");
		}
	}
}

async fn shutdown_requested() {
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
}
