// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment-driven configuration shared by both client binaries.

use std::path::PathBuf;

use wgfeed_backend::BackendKind;

use crate::error::ClientError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub backend: BackendKind,
	pub state_path: PathBuf,
	pub setup_urls: Vec<String>,
}

impl ClientConfig {
	/// Reads `BACKEND`, `STATE_PATH`, and `SETUP_URLS` from the
	/// environment. `STATE_PATH` defaults per-OS (see [`default_state_path`]).
	pub fn from_env() -> Result<Self> {
		let backend = std::env::var("BACKEND")
			.unwrap_or_default()
			.trim()
			.parse::<BackendKind>()
			.map_err(|_| {
				ClientError::Config(
					"BACKEND must be one of \"wg-quick\", \"networkmanager\", \"windows\""
						.to_string(),
				)
			})?;

		let state_path = match std::env::var("STATE_PATH") {
			Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
			_ => default_state_path()?,
		};

		let setup_urls = split_comma_separated(
			std::env::var("SETUP_URLS").unwrap_or_default().as_str(),
		);
		if setup_urls.is_empty() {
			return Err(ClientError::Config(
				"SETUP_URLS is required (comma-separated list of setup URLs)".to_string(),
			));
		}

		Ok(Self {
			backend,
			state_path,
			setup_urls,
		})
	}
}

/// Platform defaults: `%APPDATA%` on Windows, `~/Library/Application
/// Support` on macOS, `$XDG_STATE_HOME` (or `~/.local/state`) elsewhere.
pub fn default_state_path() -> Result<PathBuf> {
	let home = dirs::home_dir();

	let base = if cfg!(target_os = "windows") {
		match std::env::var("APPDATA") {
			Ok(appdata) if !appdata.trim().is_empty() => PathBuf::from(appdata.trim()),
			_ => home
				.map(|h| h.join("AppData").join("Roaming"))
				.ok_or_else(|| {
					ClientError::Config(
						"cannot determine state path: APPDATA and HOME are empty".to_string(),
					)
				})?,
		}
	} else if cfg!(target_os = "macos") {
		home.map(|h| h.join("Library").join("Application Support"))
			.ok_or_else(|| {
				ClientError::Config("cannot determine state path: HOME is empty".to_string())
			})?
	} else {
		match std::env::var("XDG_STATE_HOME") {
			Ok(state_home) if !state_home.trim().is_empty() => PathBuf::from(state_home.trim()),
			_ => home.map(|h| h.join(".local").join("state")).ok_or_else(|| {
				ClientError::Config(
					"cannot determine state path: XDG_STATE_HOME and HOME are empty".to_string(),
				)
			})?,
		}
	};

	Ok(base.join("wg-feed").join("state.json"))
}

/// Splits a comma-separated value, trimming whitespace and dropping empty
/// items.
fn split_comma_separated(raw: &str) -> Vec<String> {
	raw.split(',')
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.map(str::to_string)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_split_comma_separated() {
		assert_eq!(
			split_comma_separated(" https://a/x#k , ,https://b/y"),
			vec!["https://a/x#k".to_string(), "https://b/y".to_string()]
		);
		assert!(split_comma_separated("").is_empty());
		assert!(split_comma_separated(" , ,").is_empty());
	}

	#[test]
	fn test_default_state_path_ends_with_state_json() {
		let path = default_state_path().unwrap();
		assert!(path.ends_with(PathBuf::from("wg-feed").join("state.json")));
	}
}
