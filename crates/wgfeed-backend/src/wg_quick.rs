// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend driving the userspace `wg-quick` scripts.
//!
//! When the interface is already up, peers and keys are updated in place
//! via `wg syncconf`/`wg setconf` so traffic keeps flowing; the interface
//! is only bounced (`wg-quick down` + `up`) when an in-place update is not
//! possible.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::BackendError;
use crate::exec::CommandRunner;
use crate::{write_private_file, Backend, Result};

pub struct WgQuickBackend {
	runner: Arc<dyn CommandRunner>,
}

impl WgQuickBackend {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		Self { runner }
	}

	async fn is_up(&self, iface: &str) -> bool {
		self.runner.run("wg", &["show", iface]).await.is_ok()
	}

	/// Updates the running device from the stripped config. Returns false
	/// when the caller must fall back to bouncing the interface.
	async fn try_device_update(&self, tmp_dir: &Path, config_path: &str, iface: &str) -> bool {
		let stripped = match self.runner.run("wg-quick", &["strip", config_path]).await {
			Ok(out) => out.stdout.trim().to_string(),
			Err(e) => {
				debug!(iface, error = %e, "wg-quick strip failed");
				return false;
			}
		};
		if stripped.is_empty() {
			debug!(iface, "wg-quick strip returned empty config");
			return false;
		}

		let stripped_path = tmp_dir.join(format!("{iface}.stripped.conf"));
		if write_private_file(&stripped_path, format!("{stripped}\n").as_bytes())
			.await
			.is_err()
		{
			return false;
		}
		let stripped_path = stripped_path.to_string_lossy().into_owned();

		// Prefer syncconf (removes peers not in config); fall back to setconf.
		match self.runner.run("wg", &["syncconf", iface, &stripped_path]).await {
			Ok(_) => return true,
			Err(e) => debug!(iface, error = %e, "wg syncconf failed"),
		}
		match self.runner.run("wg", &["setconf", iface, &stripped_path]).await {
			Ok(_) => true,
			Err(e) => {
				debug!(iface, error = %e, "wg setconf failed");
				false
			}
		}
	}

	async fn bring_down(&self, iface: &str) -> Result<()> {
		match self.runner.run("wg-quick", &["down", iface]).await {
			Ok(_) => Ok(()),
			// Taking down an interface that is not up is not a failure.
			Err(BackendError::CommandFailed { stderr, .. })
				if stderr.contains("is not a WireGuard interface") =>
			{
				Ok(())
			}
			Err(e) => Err(e),
		}
	}
}

#[async_trait]
impl Backend for WgQuickBackend {
	async fn apply(&self, name: &str, wg_quick_config: &str, enabled: bool) -> Result<()> {
		let iface = name.trim();
		if iface.is_empty() {
			return Err(BackendError::InvalidInput(
				"wg-quick backend requires a non-empty tunnel name".to_string(),
			));
		}

		let mut config = wg_quick_config.to_string();
		if !config.ends_with('\n') {
			config.push('\n');
		}

		// The scratch directory is removed when `tmp_dir` drops, on every
		// exit path.
		let tmp_dir = tempfile::Builder::new().prefix("wg-feed-").tempdir()?;
		let config_path = tmp_dir.path().join(format!("{iface}.conf"));
		write_private_file(&config_path, config.as_bytes()).await?;
		let config_path_str = config_path.to_string_lossy().into_owned();

		if enabled {
			if self.is_up(iface).await
				&& self
					.try_device_update(tmp_dir.path(), &config_path_str, iface)
					.await
			{
				return Ok(());
			}
			// Interface is down, or the in-place update failed: bounce it.
			let _ = self.runner.run("wg-quick", &["down", iface]).await;
			self.runner.run("wg-quick", &["up", &config_path_str]).await?;
			return Ok(());
		}

		self.bring_down(iface).await
	}

	async fn remove(&self, name: &str) -> Result<()> {
		let iface = name.trim();
		if iface.is_empty() {
			return Ok(());
		}
		let _ = self.runner.run("wg-quick", &["down", iface]).await;
		Ok(())
	}
}
