// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Protocol client for the `wg-feed-00` feed transport.
//!
//! This crate speaks the wire protocol: conditional point fetches with
//! `If-None-Match`, SSE streaming, randomized endpoint failover, and the
//! end-to-end confidentiality layer (age decryption keyed by the setup URL
//! fragment). It never logs or transmits a URL fragment; use
//! [`redact_url`] for anything that ends up in a log line.

pub mod confidential;
pub mod endpoints;
pub mod error;
pub mod fetch;
pub mod redact;
pub mod stream;

pub use confidential::decrypt_feed_document_for_setup_url;
pub use endpoints::{fetch_any_endpoints, shuffled_endpoints, stream_any_endpoints};
pub use error::FeedError;
pub use fetch::{decode_success_payload, fetch_with_decrypt_url, FetchOutcome, FetchedDocument};
pub use redact::redact_url;
pub use stream::{stream_sse, StreamHandler};

use std::time::Duration;

/// Timeout applied to every point fetch. Streams are untimed.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Builds the HTTP client shared by all feed tasks.
pub fn new_http_client() -> reqwest::Client {
	reqwest::Client::builder()
		.user_agent(concat!("wg-feed/", env!("CARGO_PKG_VERSION")))
		.build()
		.expect("failed to build HTTP client")
}
