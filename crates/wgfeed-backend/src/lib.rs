// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel backends for wg-feed.
//!
//! A backend maps the abstract "this tunnel exists with this config, in
//! this enabled state" onto a concrete WireGuard installation mechanism:
//! userspace `wg-quick` scripts, NetworkManager keyfiles, or the Windows
//! tunnel service. Backends are side-effectful and idempotent at the
//! operation level: `remove` never fails on an already-absent tunnel.

pub mod exec;
pub mod keyfile;
pub mod network_manager;
pub mod wg_quick;
pub mod wgquick_config;
pub mod windows;

mod error;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::BackendError;
pub use exec::{CommandRunner, ExecOutput, SystemRunner};
pub use keyfile::Keyfile;
pub use network_manager::NetworkManagerBackend;
pub use wg_quick::WgQuickBackend;
pub use wgquick_config::{Interface, Peer, WgQuickConfig};
pub use windows::WindowsBackend;

pub type Result<T> = std::result::Result<T, BackendError>;

/// The two operations every backend supports.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Installs or updates the tunnel `name` from `wg_quick_config`,
	/// bringing it up or down per `enabled`.
	async fn apply(&self, name: &str, wg_quick_config: &str, enabled: bool) -> Result<()>;

	/// Removes the tunnel `name`. Best-effort: an absent tunnel is not an
	/// error.
	async fn remove(&self, name: &str) -> Result<()>;
}

/// Which backend implementation to use, selected via configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	WgQuick,
	NetworkManager,
	Windows,
}

impl BackendKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			BackendKind::WgQuick => "wg-quick",
			BackendKind::NetworkManager => "networkmanager",
			BackendKind::Windows => "windows",
		}
	}
}

impl FromStr for BackendKind {
	type Err = BackendError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim() {
			"wg-quick" => Ok(BackendKind::WgQuick),
			"networkmanager" => Ok(BackendKind::NetworkManager),
			"windows" => Ok(BackendKind::Windows),
			other => Err(BackendError::UnknownBackend(other.to_string())),
		}
	}
}

impl std::fmt::Display for BackendKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Builds the backend for `kind`, wired to the real system command runner.
pub fn new_backend(kind: BackendKind) -> Arc<dyn Backend> {
	let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
	match kind {
		BackendKind::WgQuick => Arc::new(WgQuickBackend::new(runner)),
		BackendKind::NetworkManager => Arc::new(NetworkManagerBackend::new(runner)),
		BackendKind::Windows => Arc::new(WindowsBackend::new(runner)),
	}
}

/// Writes `bytes` to `path` readable by the owner only. Tunnel configs
/// carry private keys.
pub(crate) async fn write_private_file(path: &Path, bytes: &[u8]) -> Result<()> {
	tokio::fs::write(path, bytes).await?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
	}
	Ok(())
}
