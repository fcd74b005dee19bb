// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Randomized endpoint failover.
//!
//! Every multi-endpoint operation shuffles its candidate list with a CSPRNG
//! before trying them in order: a predictable shuffle would let an
//! adversarial endpoint bias which server devices prefer.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use reqwest::Client;
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::fetch::{fetch_with_decrypt_url, FetchOutcome};
use crate::redact::redact_url;
use crate::stream::{stream_sse, StreamHandler};

/// Returns the non-blank endpoints in CSPRNG-shuffled order.
pub fn shuffled_endpoints(endpoints: &[String]) -> Vec<String> {
	let mut out: Vec<String> = endpoints
		.iter()
		.map(|e| e.trim().to_string())
		.filter(|e| !e.is_empty())
		.collect();
	out.shuffle(&mut OsRng);
	out
}

/// Tracks the last terminal and last retriable failures across a failover
/// pass, and decides which one to surface.
struct FailoverLedger {
	attempts: usize,
	terminal_count: usize,
	last_terminal: Option<FeedError>,
	last_retriable: Option<FeedError>,
}

impl FailoverLedger {
	fn new(attempts: usize) -> Self {
		Self {
			attempts,
			terminal_count: 0,
			last_terminal: None,
			last_retriable: None,
		}
	}

	fn record(&mut self, error: FeedError) {
		if error.is_retriable() {
			self.last_retriable = Some(error);
		} else {
			self.terminal_count += 1;
			self.last_terminal = Some(error);
		}
	}

	/// All-terminal passes surface the terminal error (the task must stop);
	/// otherwise the last retriable error wins so the caller keeps trying.
	fn into_error(self) -> FeedError {
		if self.terminal_count == self.attempts {
			if let Some(err) = self.last_terminal {
				return err;
			}
		}
		if let Some(err) = self.last_retriable {
			return err;
		}
		if let Some(err) = self.last_terminal {
			return err;
		}
		FeedError::AllEndpointsFailed
	}
}

/// Fetches a feed from the first endpoint that answers, in randomized
/// order. Returns the outcome together with the endpoint that served it.
pub async fn fetch_any_endpoints(
	client: &Client,
	endpoints: &[String],
	decrypt_url: &str,
	if_none_match: &str,
) -> Result<(FetchOutcome, String)> {
	let order = shuffled_endpoints(endpoints);
	if order.is_empty() {
		return Err(FeedError::NoEndpoints);
	}

	let mut ledger = FailoverLedger::new(order.len());
	for endpoint in order {
		match fetch_with_decrypt_url(client, &endpoint, decrypt_url, if_none_match).await {
			Ok(outcome) => return Ok((outcome, endpoint)),
			Err(error) => {
				debug!(
					endpoint = %redact_url(&endpoint),
					error = %error,
					"endpoint fetch failed"
				);
				ledger.record(error);
			}
		}
	}
	Err(ledger.into_error())
}

/// Opens an SSE stream against the first endpoint that accepts, in
/// randomized order. [`FeedError::StreamNotSupported`] bypasses failover
/// and is returned immediately: a server that answers without SSE speaks
/// for the feed, and the caller should poll instead.
pub async fn stream_any_endpoints(
	client: &Client,
	endpoints: &[String],
	handler: &mut dyn StreamHandler,
) -> Result<()> {
	let order = shuffled_endpoints(endpoints);
	if order.is_empty() {
		return Err(FeedError::NoEndpoints);
	}

	let mut ledger = FailoverLedger::new(order.len());
	for endpoint in order {
		match stream_sse(client, &endpoint, handler).await {
			Ok(()) => return Ok(()),
			Err(FeedError::StreamNotSupported) => return Err(FeedError::StreamNotSupported),
			Err(error) => {
				debug!(
					endpoint = %redact_url(&endpoint),
					error = %error,
					"endpoint stream failed"
				);
				ledger.record(error);
			}
		}
	}
	Err(ledger.into_error())
}
