// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The reconciliation engine: maps a feed document onto installed tunnels.

use std::collections::HashSet;

use tracing::{error, warn};
use wgfeed_backend::Backend;
use wgfeed_model::FeedDocument;
use wgfeed_proto::redact_url;
use wgfeed_state::{State, TunnelState};

use crate::error::ClientError;
use crate::Result;

/// Diffs the document against the feed's stored tunnel set and drives the
/// backend.
///
/// For non-forced tunnels the document's `enabled` is only the initial
/// default: once a tunnel has state, the stored flag wins so a user's
/// local toggle survives publisher updates. Any Apply failure aborts
/// without touching `last_reconciled_revision` (the caller owns that), so
/// the next cycle retries. Removals of vanished tunnels are best-effort.
pub async fn apply_feed(
	backend: &dyn Backend,
	state: &mut State,
	source_url: &str,
	doc: &FeedDocument,
) -> Result<()> {
	let feed_id = doc.id.trim().to_string();
	if feed_id.is_empty() {
		return Err(ClientError::MissingFeedId {
			url: redact_url(source_url),
		});
	}

	let feed_state = state.feeds.entry(feed_id).or_default();

	let mut current_tunnel_ids = HashSet::with_capacity(doc.tunnels.len());
	for tunnel in &doc.tunnels {
		current_tunnel_ids.insert(tunnel.id.clone());

		let prior = feed_state.tunnels.get(&tunnel.id).cloned();
		let mut enabled = tunnel.enabled;
		if let Some(prior) = &prior {
			if !tunnel.forced {
				// The stored flag reflects the user's last choice.
				enabled = prior.enabled;
			}
			// A changed name means the backend knows the tunnel under the
			// old identity: recreate it.
			let old_name = prior.name.trim();
			if !old_name.is_empty() && old_name != tunnel.name.trim() {
				if let Err(e) = backend.remove(&prior.name).await {
					warn!(
						feed = %redact_url(source_url),
						tunnel = %tunnel.id,
						name = %prior.name,
						error = %e,
						"remove of renamed tunnel failed"
					);
				}
				feed_state.tunnels.remove(&tunnel.id);
			}
		}

		if let Err(e) = backend
			.apply(&tunnel.name, &tunnel.wg_quick_config, enabled)
			.await
		{
			error!(
				feed = %redact_url(source_url),
				tunnel = %tunnel.id,
				name = %tunnel.name,
				enabled,
				error = %e,
				"apply failed"
			);
			return Err(e.into());
		}
		feed_state.tunnels.insert(
			tunnel.id.clone(),
			TunnelState {
				name: tunnel.name.clone(),
				enabled,
			},
		);
	}

	// Tunnels previously seen but missing from the document are removed.
	let stale: Vec<(String, TunnelState)> = feed_state
		.tunnels
		.iter()
		.filter(|(id, _)| !current_tunnel_ids.contains(*id))
		.map(|(id, ts)| (id.clone(), ts.clone()))
		.collect();
	for (tunnel_id, tunnel_state) in stale {
		if let Err(e) = backend.remove(&tunnel_state.name).await {
			warn!(
				feed = %redact_url(source_url),
				tunnel = %tunnel_id,
				name = %tunnel_state.name,
				error = %e,
				"remove failed"
			);
		}
		feed_state.tunnels.remove(&tunnel_id);
	}

	Ok(())
}
