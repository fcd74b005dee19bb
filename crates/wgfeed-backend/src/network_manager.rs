// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend rendering NetworkManager keyfiles.
//!
//! The connection file is edited in place: peer sections are rebuilt from
//! the document on every apply, while sections NetworkManager or the
//! administrator added (proxy settings, permissions, ...) are preserved
//! byte-for-byte, as is the connection UUID.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::exec::CommandRunner;
use crate::keyfile::Keyfile;
use crate::wgquick_config::{self, WgQuickConfig};
use crate::{write_private_file, Backend, Result};

const DEFAULT_CONNECTIONS_DIR: &str = "/etc/NetworkManager/system-connections";

pub struct NetworkManagerBackend {
	runner: Arc<dyn CommandRunner>,
	connections_dir: PathBuf,
}

impl NetworkManagerBackend {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		Self::with_connections_dir(runner, PathBuf::from(DEFAULT_CONNECTIONS_DIR))
	}

	pub fn with_connections_dir(runner: Arc<dyn CommandRunner>, connections_dir: PathBuf) -> Self {
		Self {
			runner,
			connections_dir,
		}
	}

	fn connection_path(&self, name: &str) -> PathBuf {
		self.connections_dir
			.join(format!("{}.nmconnection", sanitize_file_name(name)))
	}
}

#[async_trait]
impl Backend for NetworkManagerBackend {
	async fn apply(&self, name: &str, wg_quick_config: &str, enabled: bool) -> Result<()> {
		if name.trim().is_empty() {
			return Err(BackendError::InvalidInput(
				"networkmanager backend requires a non-empty connection name".to_string(),
			));
		}

		let parsed = wgquick_config::parse(wg_quick_config)?;
		if parsed.interface.private_key.trim().is_empty() {
			return Err(BackendError::InvalidInput(
				"wg-quick config missing [Interface] PrivateKey".to_string(),
			));
		}
		if parsed.peers.is_empty() {
			return Err(BackendError::InvalidInput(
				"wg-quick config missing at least one [Peer]".to_string(),
			));
		}

		let path = self.connection_path(name);
		let existing = tokio::fs::read(&path).await.ok();
		let rendered = render_connection(existing.as_deref(), name, &parsed);

		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		write_private_file(&path, &rendered).await?;

		let _ = self.runner.run("nmcli", &["connection", "reload"]).await;
		if enabled {
			self.runner
				.run("nmcli", &["connection", "up", "id", name])
				.await?;
		} else {
			self.runner
				.run("nmcli", &["connection", "down", "id", name])
				.await?;
		}
		Ok(())
	}

	async fn remove(&self, name: &str) -> Result<()> {
		let _ = self
			.runner
			.run("nmcli", &["connection", "down", "id", name])
			.await;
		let _ = self
			.runner
			.run("nmcli", &["connection", "delete", "id", name])
			.await;
		let _ = tokio::fs::remove_file(self.connection_path(name)).await;
		Ok(())
	}
}

fn render_connection(existing: Option<&[u8]>, name: &str, parsed: &WgQuickConfig) -> Vec<u8> {
	let mut keyfile = match existing {
		Some(bytes) => Keyfile::parse(bytes),
		None => Keyfile::new(),
	};

	let uuid = keyfile
		.get("connection", "uuid")
		.filter(|value| !value.trim().is_empty())
		.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

	keyfile.set("connection", "id", name);
	keyfile.set("connection", "uuid", &uuid);
	keyfile.set("connection", "type", "wireguard");
	keyfile.set("connection", "interface-name", name);

	if let Some(mtu) = parsed.interface.mtu {
		keyfile.set("wireguard", "mtu", &mtu.to_string());
	}
	keyfile.set("wireguard", "private-key", &parsed.interface.private_key);

	// Peer sections are owned by the feed: rebuild those only.
	keyfile.remove_sections_with_prefix("wireguard-peer.");
	for peer in &parsed.peers {
		let public_key = peer.public_key.trim();
		if public_key.is_empty() {
			continue;
		}
		let section = format!("wireguard-peer.{public_key}");
		if !peer.endpoint.is_empty() {
			keyfile.set(&section, "endpoint", &peer.endpoint);
		}
		if !peer.preshared_key.is_empty() {
			keyfile.set(&section, "preshared-key", &peer.preshared_key);
			keyfile.set(&section, "preshared-key-flags", "0");
		}
		if !peer.allowed_ips.is_empty() {
			keyfile.set(&section, "allowed-ips", &nm_list(&peer.allowed_ips));
		}
	}

	let (ipv4_addrs, ipv6_addrs) = split_addresses(&parsed.interface.addresses);
	if let Some(addr) = ipv4_addrs.first() {
		keyfile.set("ipv4", "method", "manual");
		keyfile.set("ipv4", "address1", addr);
	} else {
		keyfile.set("ipv4", "method", "disabled");
	}
	if !parsed.interface.dns.is_empty() {
		keyfile.set("ipv4", "dns", &nm_list(&parsed.interface.dns));
		keyfile.set("ipv4", "dns-search", "~;");
	}

	if let Some(addr) = ipv6_addrs.first() {
		keyfile.set("ipv6", "method", "manual");
		keyfile.set("ipv6", "address1", addr);
	} else {
		keyfile.set("ipv6", "method", "disabled");
		keyfile.set("ipv6", "addr-gen-mode", "default");
	}

	keyfile.to_bytes()
}

/// Maps a connection name to a safe file name: `[A-Za-z0-9._-]` kept,
/// everything else replaced with `_`. Empty names become `wg-feed`.
fn sanitize_file_name(name: &str) -> String {
	let name = name.trim();
	if name.is_empty() {
		return "wg-feed".to_string();
	}
	name.chars()
		.map(|c| match c {
			'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
			_ => '_',
		})
		.collect()
}

fn split_addresses(addresses: &[String]) -> (Vec<String>, Vec<String>) {
	let mut ipv4 = Vec::new();
	let mut ipv6 = Vec::new();
	for address in addresses {
		let address = address.trim();
		if address.is_empty() {
			continue;
		}
		if address.contains(':') {
			ipv6.push(address.to_string());
		} else {
			ipv4.push(address.to_string());
		}
	}
	(ipv4, ipv6)
}

/// NetworkManager list syntax: `;`-joined with a trailing `;`.
fn nm_list(values: &[String]) -> String {
	let clean: Vec<&str> = values
		.iter()
		.map(|v| v.trim())
		.filter(|v| !v.is_empty())
		.collect();
	if clean.is_empty() {
		return String::new();
	}
	format!("{};", clean.join(";"))
}
