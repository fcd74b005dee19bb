// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Salted URL hashing and endpoint preference ordering.
//!
//! Setup URLs are never persisted. They are keyed by
//! `hex(HMAC-SHA-256(salt, canonical_url))`, where the canonical form drops
//! the fragment (the age key lives there) and lowercases scheme and host.
//! Endpoint preference is stored as a list of the same salted hashes.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use url::Url;

use crate::store::{State, StateError};

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 32;
const MIN_SALT_LEN: usize = 16;

/// Returns a stable string form of a setup or endpoint URL with its
/// fragment removed and scheme/host lowercased. Port, path, and query are
/// preserved byte for byte.
pub fn canonical_url_no_fragment(raw: &str) -> Result<String, StateError> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Err(StateError::InvalidUrl("empty url".to_string()));
	}
	let mut url = Url::parse(raw).map_err(|e| StateError::InvalidUrl(e.to_string()))?;
	url.set_fragment(None);
	Ok(url.to_string())
}

impl State {
	/// Returns the salted hash key for a URL, generating the salt on first
	/// use. Fragments are ignored.
	pub fn setup_url_key(&mut self, raw_url: &str) -> Result<String, StateError> {
		let salt = self.ensure_setup_url_salt()?;
		let canon = canonical_url_no_fragment(raw_url)?;
		let mut mac = HmacSha256::new_from_slice(&salt).expect("HMAC can take key of any size");
		mac.update(canon.as_bytes());
		Ok(hex::encode(mac.finalize().into_bytes()))
	}

	/// Returns the salted hash key for an endpoint URL.
	pub fn endpoint_key(&mut self, endpoint_url: &str) -> Result<String, StateError> {
		self.setup_url_key(endpoint_url)
	}

	fn ensure_setup_url_salt(&mut self) -> Result<Vec<u8>, StateError> {
		if self.setup_url_salt.trim().is_empty() {
			let mut salt = [0u8; SALT_LEN];
			OsRng.fill_bytes(&mut salt);
			self.setup_url_salt = hex::encode(salt);
			return Ok(salt.to_vec());
		}
		let salt = hex::decode(self.setup_url_salt.trim())
			.map_err(|e| StateError::InvalidSalt(e.to_string()))?;
		if salt.len() < MIN_SALT_LEN {
			return Err(StateError::InvalidSalt("too short".to_string()));
		}
		Ok(salt)
	}

	/// Returns `endpoints` permuted so that entries matching the stored
	/// preference hashes come first; the rest keep their document order.
	pub fn order_endpoints(&mut self, feed_id: &str, endpoints: &[String]) -> Vec<String> {
		let trimmed: Vec<String> = endpoints
			.iter()
			.map(|e| e.trim().to_string())
			.filter(|e| !e.is_empty())
			.collect();

		let feed_id = feed_id.trim();
		if feed_id.is_empty() {
			return trimmed;
		}
		let preferred = match self.feeds.get(feed_id) {
			Some(fs) if !fs.endpoint_order.is_empty() => fs.endpoint_order.clone(),
			_ => return trimmed,
		};
		if trimmed.is_empty() {
			return trimmed;
		}

		let mut hash_to_endpoint = std::collections::HashMap::with_capacity(trimmed.len());
		for endpoint in &trimmed {
			let Ok(hash) = self.endpoint_key(endpoint) else {
				continue;
			};
			// On collision the first endpoint wins.
			hash_to_endpoint.entry(hash).or_insert(endpoint.clone());
		}

		let mut out = Vec::with_capacity(trimmed.len());
		let mut used = std::collections::HashSet::with_capacity(trimmed.len());
		for hash in &preferred {
			let Some(endpoint) = hash_to_endpoint.get(hash.trim()) else {
				continue;
			};
			if used.insert(endpoint.clone()) {
				out.push(endpoint.clone());
			}
		}
		for endpoint in trimmed {
			if !used.contains(&endpoint) {
				out.push(endpoint);
			}
		}
		out
	}

	/// Rebuilds the stored hash order for a feed from the current document
	/// endpoints. `promoted_endpoint`, when present in the document, moves
	/// to the front; surviving entries of the previous order follow, then
	/// the remaining document endpoints.
	pub fn reconcile_endpoint_order(
		&mut self,
		feed_id: &str,
		endpoints: &[String],
		promoted_endpoint: Option<&str>,
	) {
		let feed_id = feed_id.trim().to_string();
		if feed_id.is_empty() {
			return;
		}

		let mut document_hashes = Vec::with_capacity(endpoints.len());
		let mut in_document = std::collections::HashSet::new();
		for endpoint in endpoints {
			let endpoint = endpoint.trim();
			if endpoint.is_empty() {
				continue;
			}
			let Ok(hash) = self.endpoint_key(endpoint) else {
				continue;
			};
			in_document.insert(hash.clone());
			document_hashes.push(hash);
		}

		let existing = self
			.feeds
			.get(&feed_id)
			.map(|fs| fs.endpoint_order.clone())
			.unwrap_or_default();

		let new_order = if document_hashes.is_empty() {
			Vec::new()
		} else {
			let promoted_hash = promoted_endpoint
				.map(str::trim)
				.filter(|e| !e.is_empty())
				.and_then(|e| self.endpoint_key(e).ok())
				.filter(|h| in_document.contains(h));

			let mut out = Vec::with_capacity(document_hashes.len());
			let mut seen = std::collections::HashSet::new();
			let mut add = |hash: &str| {
				let hash = hash.trim();
				if !hash.is_empty() && seen.insert(hash.to_string()) {
					out.push(hash.to_string());
				}
			};

			if let Some(hash) = &promoted_hash {
				add(hash);
			}
			for hash in &existing {
				if in_document.contains(hash.trim()) {
					add(hash);
				}
			}
			for hash in &document_hashes {
				add(hash);
			}
			out
		};

		let fs = self.feeds.entry(feed_id).or_default();
		fs.endpoint_order = new_order;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::FeedState;

	const FEED_ID: &str = "11111111-1111-4111-8111-111111111111";

	fn endpoints(list: &[&str]) -> Vec<String> {
		list.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_canonical_drops_fragment_and_lowercases() {
		let canon =
			canonical_url_no_fragment("HTTPS://Feeds.Example.COM:8443/Path?q=1#secret").unwrap();
		assert_eq!(canon, "https://feeds.example.com:8443/Path?q=1");
	}

	#[test]
	fn test_canonical_rejects_empty() {
		assert!(canonical_url_no_fragment("   ").is_err());
	}

	#[test]
	fn test_key_is_stable_and_fragment_insensitive() {
		let mut state = State::default();
		let a = state.setup_url_key("https://h/x#one").unwrap();
		let b = state.setup_url_key("https://h/x#two").unwrap();
		let c = state.setup_url_key("https://h/x").unwrap();
		assert_eq!(a, b);
		assert_eq!(a, c);
		assert_eq!(a.len(), 64);
	}

	#[test]
	fn test_key_differs_across_salts() {
		let mut one = State::default();
		let mut two = State::default();
		let a = one.setup_url_key("https://h/x").unwrap();
		let b = two.setup_url_key("https://h/x").unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn test_salt_generated_lazily_and_reused() {
		let mut state = State::default();
		assert!(state.setup_url_salt.is_empty());
		state.setup_url_key("https://h/x").unwrap();
		let salt = state.setup_url_salt.clone();
		assert_eq!(salt.len(), 64);
		state.setup_url_key("https://h/y").unwrap();
		assert_eq!(state.setup_url_salt, salt);
	}

	#[test]
	fn test_short_salt_rejected() {
		let mut state = State::default();
		state.setup_url_salt = hex::encode([0u8; 8]);
		assert!(state.setup_url_key("https://h/x").is_err());
	}

	#[test]
	fn test_order_endpoints_without_preference_keeps_document_order() {
		let mut state = State::default();
		let eps = endpoints(&["https://a/", "https://b/"]);
		assert_eq!(state.order_endpoints(FEED_ID, &eps), eps);
	}

	#[test]
	fn test_order_endpoints_prefers_stored_hashes() {
		let mut state = State::default();
		let eps = endpoints(&["https://a/", "https://b/", "https://c/"]);
		let b_hash = state.endpoint_key("https://b/").unwrap();
		state.feeds.insert(
			FEED_ID.to_string(),
			FeedState {
				endpoint_order: vec![b_hash],
				..Default::default()
			},
		);
		assert_eq!(
			state.order_endpoints(FEED_ID, &eps),
			endpoints(&["https://b/", "https://a/", "https://c/"])
		);
	}

	#[test]
	fn test_order_endpoints_ignores_stale_hashes() {
		let mut state = State::default();
		let eps = endpoints(&["https://a/"]);
		let stale = state.endpoint_key("https://gone/").unwrap();
		state.feeds.insert(
			FEED_ID.to_string(),
			FeedState {
				endpoint_order: vec![stale],
				..Default::default()
			},
		);
		assert_eq!(state.order_endpoints(FEED_ID, &eps), eps);
	}

	#[test]
	fn test_reconcile_endpoint_order_promotes_used_endpoint() {
		let mut state = State::default();
		let eps = endpoints(&["https://a/", "https://b/", "https://c/"]);
		state.reconcile_endpoint_order(FEED_ID, &eps, Some("https://b/"));

		let expected: Vec<String> = ["https://b/", "https://a/", "https://c/"]
			.iter()
			.map(|e| state.endpoint_key(e).unwrap())
			.collect();
		assert_eq!(state.feeds[FEED_ID].endpoint_order, expected);
	}

	#[test]
	fn test_reconcile_endpoint_order_keeps_survivors_before_new() {
		let mut state = State::default();
		state.reconcile_endpoint_order(
			FEED_ID,
			&endpoints(&["https://a/", "https://b/"]),
			Some("https://b/"),
		);
		// New document drops a/, adds c/; b/ survives in front.
		state.reconcile_endpoint_order(
			FEED_ID,
			&endpoints(&["https://b/", "https://c/"]),
			None,
		);

		let expected: Vec<String> = ["https://b/", "https://c/"]
			.iter()
			.map(|e| state.endpoint_key(e).unwrap())
			.collect();
		assert_eq!(state.feeds[FEED_ID].endpoint_order, expected);
	}

	#[test]
	fn test_reconcile_endpoint_order_ignores_foreign_promoted() {
		let mut state = State::default();
		let eps = endpoints(&["https://a/"]);
		state.reconcile_endpoint_order(FEED_ID, &eps, Some("https://not-in-doc/"));
		let expected = vec![state.endpoint_key("https://a/").unwrap()];
		assert_eq!(state.feeds[FEED_ID].endpoint_order, expected);
	}
}
