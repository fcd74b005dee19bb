// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend driving the WireGuard for Windows tunnel service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::exec::CommandRunner;
use crate::{write_private_file, Backend, Result};

pub struct WindowsBackend {
	runner: Arc<dyn CommandRunner>,
}

impl WindowsBackend {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		Self { runner }
	}
}

#[async_trait]
impl Backend for WindowsBackend {
	async fn apply(&self, name: &str, wg_quick_config: &str, enabled: bool) -> Result<()> {
		let name = name.trim();
		if name.is_empty() {
			return Err(BackendError::InvalidInput(
				"windows backend requires a non-empty tunnel name".to_string(),
			));
		}

		// WireGuard for Windows installs via
		// `wireguard.exe /installtunnelservice <configPath>` and uninstalls
		// via `/uninstalltunnelservice <tunnelName>`. Uninstall first so a
		// stale service never shadows the new config.
		let _ = self
			.runner
			.run("wireguard.exe", &["/uninstalltunnelservice", name])
			.await;
		if !enabled {
			return Ok(());
		}

		let mut config = wg_quick_config.to_string();
		if !config.ends_with('\n') {
			config.push('\n');
		}

		let tmp_dir = tempfile::Builder::new().prefix("wg-feed-").tempdir()?;
		let config_path = tmp_dir.path().join(format!("{name}.conf"));
		write_private_file(&config_path, config.as_bytes()).await?;
		let config_path = config_path.to_string_lossy().into_owned();

		self.runner
			.run("wireguard.exe", &["/installtunnelservice", &config_path])
			.await?;
		Ok(())
	}

	async fn remove(&self, name: &str) -> Result<()> {
		let _ = self
			.runner
			.run("wireguard.exe", &["/uninstalltunnelservice", name])
			.await;
		Ok(())
	}
}
