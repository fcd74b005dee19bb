// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One-shot apply: fetch every configured feed once, reconcile, save, exit.

use std::collections::HashMap;

use reqwest::Client;
use tracing::warn;
use wgfeed_backend::{new_backend, Backend};
use wgfeed_proto::{
	decrypt_feed_document_for_setup_url, fetch_any_endpoints, fetch_with_decrypt_url,
	new_http_client, redact_url, FetchOutcome, FetchedDocument,
};
use wgfeed_state::State;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reconcile::apply_feed;
use crate::Result;

pub async fn run_once(config: &ClientConfig) -> Result<()> {
	let backend = new_backend(config.backend);
	run_once_with_backend(config, backend.as_ref()).await
}

pub async fn run_once_with_backend(config: &ClientConfig, backend: &dyn Backend) -> Result<()> {
	let http = new_http_client();
	let mut state = State::load(&config.state_path).await?;

	// Deduplicates setup URLs that resolve to the same feed within this
	// invocation.
	let mut seen: HashMap<String, String> = HashMap::new();
	for setup_url in &config.setup_urls {
		apply_one(&http, backend, &mut state, setup_url, &mut seen).await?;
	}

	state.save_atomic(&config.state_path).await?;
	Ok(())
}

/// A one-shot apply is always a forced reconciliation: it fetches a full
/// document (no `If-None-Match`) and applies it.
async fn apply_one(
	http: &Client,
	backend: &dyn Backend,
	state: &mut State,
	setup_url: &str,
	seen: &mut HashMap<String, String>,
) -> Result<()> {
	let setup_url = setup_url.trim();

	// Prefer endpoints learned from cached encrypted data; when they are
	// known, the setup URL itself is never used for network requests.
	let key = state.setup_url_key(setup_url)?;
	let mut endpoints: Vec<String> = Vec::new();
	let mut cached_feed_id = String::new();
	if let Some(mapped) = state.setup_url_map.get(&key) {
		cached_feed_id = mapped.trim().to_string();
	}
	if !cached_feed_id.is_empty() {
		let cached = state
			.feeds
			.get(&cached_feed_id)
			.map(|fs| fs.cached_encrypted_data.trim().to_string())
			.unwrap_or_default();
		if !cached.is_empty() {
			let doc = decrypt_feed_document_for_setup_url(setup_url, &cached)?;
			endpoints = state.order_endpoints(&cached_feed_id, &doc.endpoints);
		}
	}

	let fetched: FetchedDocument = if !endpoints.is_empty() {
		let (outcome, used_endpoint) =
			fetch_any_endpoints(http, &endpoints, setup_url, "").await?;
		let FetchOutcome::Document(doc) = outcome else {
			return Err(ClientError::UnexpectedNotModified);
		};
		// Best-effort: record endpoint preference for the next sync.
		if !cached_feed_id.is_empty() {
			state.reconcile_endpoint_order(
				&cached_feed_id,
				&doc.feed.endpoints,
				Some(&used_endpoint),
			);
		}
		doc
	} else {
		let outcome = fetch_with_decrypt_url(http, setup_url, setup_url, "").await?;
		let FetchOutcome::Document(doc) = outcome else {
			return Err(ClientError::UnexpectedNotModified);
		};
		doc
	};

	let feed_id = fetched.feed.id.trim().to_string();
	if feed_id.is_empty() {
		return Err(ClientError::MissingFeedId {
			url: redact_url(setup_url),
		});
	}
	if let Some(message) = fetched.feed.warning_message.as_deref() {
		let message = message.trim();
		if !message.is_empty() {
			warn!(feed = %redact_url(setup_url), message, "feed warning");
		}
	}
	if let Some(existing_url) = seen.get(&feed_id) {
		if existing_url != setup_url {
			warn!(
				feed_id = %feed_id,
				url = %redact_url(setup_url),
				already_seen_at = %redact_url(existing_url),
				"duplicate setup url ignored"
			);
		}
		return Ok(());
	}
	seen.insert(feed_id.clone(), setup_url.to_string());

	state.setup_url_map.insert(key, feed_id.clone());
	{
		let feed_state = state.feeds.entry(feed_id.clone()).or_default();
		feed_state.ttl_seconds = Some(fetched.ttl_seconds);
		feed_state.cached_encrypted_data = fetched
			.encrypted_data
			.as_deref()
			.map(str::trim)
			.unwrap_or("")
			.to_string();
	}

	apply_feed(backend, state, setup_url, &fetched.feed).await?;

	let feed_state = state.feeds.entry(feed_id).or_default();
	feed_state.last_reconciled_revision = fetched.revision.trim().to_string();
	Ok(())
}
