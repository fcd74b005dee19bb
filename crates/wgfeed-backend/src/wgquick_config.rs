// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parser for wg-quick configuration text.
//!
//! Section and key names are case-insensitive. `Address`, `DNS`, and
//! `AllowedIPs` accept comma-separated values and accumulate across
//! repeated lines. Unknown keys are ignored.

use crate::error::BackendError;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WgQuickConfig {
	pub interface: Interface,
	pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
	pub private_key: String,
	pub addresses: Vec<String>,
	pub dns: Vec<String>,
	pub mtu: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peer {
	pub public_key: String,
	pub preshared_key: String,
	pub endpoint: String,
	pub allowed_ips: Vec<String>,
	pub persistent_keepalive: Option<i64>,
}

pub fn parse(data: &str) -> Result<WgQuickConfig> {
	let mut config = WgQuickConfig::default();
	let mut section = String::new();

	for line in data.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
			continue;
		}
		if line.starts_with('[') && line.ends_with(']') {
			section = line[1..line.len() - 1].trim().to_lowercase();
			if section == "peer" {
				config.peers.push(Peer::default());
			}
			continue;
		}

		let Some((key, value)) = line.split_once('=') else {
			continue;
		};
		let key = key.trim().to_lowercase();
		let value = value.trim();

		match section.as_str() {
			"interface" => match key.as_str() {
				"privatekey" => config.interface.private_key = value.to_string(),
				"address" => config.interface.addresses.extend(split_comma_separated(value)),
				"dns" => config.interface.dns.extend(split_comma_separated(value)),
				"mtu" => {
					config.interface.mtu = Some(parse_int(value, "MTU")?);
				}
				_ => {}
			},
			"peer" => {
				let Some(peer) = config.peers.last_mut() else {
					continue;
				};
				match key.as_str() {
					"publickey" => peer.public_key = value.to_string(),
					"presharedkey" => peer.preshared_key = value.to_string(),
					"endpoint" => peer.endpoint = value.to_string(),
					"allowedips" => peer.allowed_ips.extend(split_comma_separated(value)),
					"persistentkeepalive" => {
						peer.persistent_keepalive =
							Some(parse_int(value, "PersistentKeepalive")?);
					}
					_ => {}
				}
			}
			_ => {}
		}
	}

	Ok(config)
}

fn parse_int(value: &str, field: &str) -> Result<i64> {
	value
		.parse()
		.map_err(|_| BackendError::WgQuickConfig(format!("invalid {field} {value:?}")))
}

/// Splits a comma-separated value, trimming whitespace and dropping empty
/// items.
pub(crate) fn split_comma_separated(value: &str) -> Vec<String> {
	value
		.split(',')
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.map(str::to_string)
		.collect()
}
