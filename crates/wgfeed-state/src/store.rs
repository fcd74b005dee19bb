// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("state file is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid setup_url_salt: {0}")]
	InvalidSalt(String),

	#[error("invalid url: {0}")]
	InvalidUrl(String),
}

/// Top-level persisted state. Maps are ordered so the saved JSON is stable
/// across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
	/// Per-installation random salt used to hash setup URLs (without
	/// storing them) into keys for `setup_url_map`.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub setup_url_salt: String,
	/// Salted hash of the canonical setup URL (no fragment) -> feed id.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub setup_url_map: BTreeMap<String, String>,
	#[serde(default)]
	pub feeds: BTreeMap<String, FeedState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedState {
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub last_reconciled_revision: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttl_seconds: Option<i64>,
	/// Armored ciphertext from the last encrypted response, kept for
	/// offline reconciliation. Empty when the last response was plaintext.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub cached_encrypted_data: String,
	/// Salted endpoint hashes in preference order.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub endpoint_order: Vec<String>,
	#[serde(default)]
	pub tunnels: BTreeMap<String, TunnelState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelState {
	pub name: String,
	pub enabled: bool,
}

impl State {
	/// Loads state from `path`. A missing file yields an empty state.
	pub async fn load(path: &Path) -> Result<State, StateError> {
		let bytes = match tokio::fs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(State::default());
			}
			Err(e) => return Err(e.into()),
		};
		let state: State = serde_json::from_slice(&bytes)?;
		Ok(state)
	}

	/// Saves state atomically: write `<path>.tmp` then rename over the
	/// target. The rename is the commit point.
	pub async fn save_atomic(&self, path: &Path) -> Result<(), StateError> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}

		let mut bytes = serde_json::to_vec_pretty(self)?;
		bytes.push(b'\n');

		let tmp = path.with_extension(tmp_extension(path));
		tokio::fs::write(&tmp, &bytes).await?;
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
		}
		tokio::fs::rename(&tmp, path).await?;
		Ok(())
	}
}

// `state.json` -> `state.json.tmp`, keeping the original extension intact.
fn tmp_extension(path: &Path) -> String {
	match path.extension().and_then(|e| e.to_str()) {
		Some(ext) => format!("{ext}.tmp"),
		None => "tmp".to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_load_missing_file_returns_empty_state() {
		let dir = TempDir::new().unwrap();
		let state = State::load(&dir.path().join("state.json")).await.unwrap();
		assert!(state.setup_url_map.is_empty());
		assert!(state.feeds.is_empty());
	}

	#[tokio::test]
	async fn test_save_and_load_round_trip() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested").join("state.json");

		let mut state = State::default();
		let mut feed = FeedState {
			last_reconciled_revision: "rev-1".to_string(),
			ttl_seconds: Some(60),
			..Default::default()
		};
		feed.tunnels.insert(
			"t1".to_string(),
			TunnelState {
				name: "home".to_string(),
				enabled: true,
			},
		);
		state
			.feeds
			.insert("11111111-1111-4111-8111-111111111111".to_string(), feed);

		state.save_atomic(&path).await.unwrap();
		let loaded = State::load(&path).await.unwrap();
		let feed = &loaded.feeds["11111111-1111-4111-8111-111111111111"];
		assert_eq!(feed.last_reconciled_revision, "rev-1");
		assert_eq!(feed.ttl_seconds, Some(60));
		assert_eq!(
			feed.tunnels["t1"],
			TunnelState {
				name: "home".to_string(),
				enabled: true
			}
		);
	}

	#[tokio::test]
	async fn test_save_leaves_no_tmp_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("state.json");
		State::default().save_atomic(&path).await.unwrap();
		assert!(path.exists());
		assert!(!dir.path().join("state.json.tmp").exists());
	}

	#[tokio::test]
	async fn test_saved_bytes_end_with_newline() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("state.json");
		State::default().save_atomic(&path).await.unwrap();
		let bytes = tokio::fs::read(&path).await.unwrap();
		assert_eq!(bytes.last(), Some(&b'\n'));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_saved_file_is_owner_only() {
		use std::os::unix::fs::PermissionsExt;
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("state.json");
		State::default().save_atomic(&path).await.unwrap();
		let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o600);
	}

	#[tokio::test]
	async fn test_setup_url_never_written_to_disk() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("state.json");

		let setup_url = "https://feeds.example.com/my-feed#agesecretfragment";
		let mut state = State::default();
		let key = state.setup_url_key(setup_url).unwrap();
		state.setup_url_map.insert(
			key,
			"11111111-1111-4111-8111-111111111111".to_string(),
		);
		state.save_atomic(&path).await.unwrap();

		let bytes = tokio::fs::read_to_string(&path).await.unwrap();
		assert!(!bytes.contains("feeds.example.com"));
		assert!(!bytes.contains("agesecretfragment"));
		assert!(!bytes.contains("my-feed"));
	}
}
