// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conditional point fetches of feed documents.

use reqwest::header::{ACCEPT, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::confidential::decrypt_feed_document_for_setup_url;
use crate::error::{FeedError, Result};
use crate::redact::redact_url;
use crate::FETCH_TIMEOUT;
use wgfeed_model::{ErrorResponse, FeedDocument, SuccessResponse};

/// Cap on the body snippet carried by opaque-status errors.
const BODY_SNIPPET_LIMIT: usize = 4096;

/// Outcome of a conditional fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
	/// 304: the revision sent as `If-None-Match` is still current.
	NotModified { revision: String },
	Document(FetchedDocument),
}

/// A freshly fetched, validated (and if necessary decrypted) document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
	pub revision: String,
	pub ttl_seconds: i64,
	pub supports_sse: bool,
	/// The armored ciphertext exactly as received, present iff the wire
	/// response was encrypted. Callers cache it for offline reconciliation.
	pub encrypted_data: Option<String>,
	pub feed: FeedDocument,
}

/// Fetches `request_url`, decrypting any encrypted payload with the age key
/// carried by `decrypt_url` (the setup URL, which may differ from the
/// request URL). `if_none_match` is the last reconciled revision or empty.
pub async fn fetch_with_decrypt_url(
	client: &Client,
	request_url: &str,
	decrypt_url: &str,
	if_none_match: &str,
) -> Result<FetchOutcome> {
	let Some(response) = fetch_success_response(client, request_url, if_none_match).await? else {
		return Ok(FetchOutcome::NotModified {
			revision: if_none_match.trim().to_string(),
		});
	};
	Ok(FetchOutcome::Document(document_from_response(
		decrypt_url,
		response,
	)?))
}

/// Decodes a raw SuccessResponse payload (as delivered by an SSE `feed`
/// event), validating and decrypting exactly like a point fetch.
pub fn decode_success_payload(decrypt_url: &str, payload: &[u8]) -> Result<FetchedDocument> {
	let response = decode_success_response(payload)?;
	document_from_response(decrypt_url, response)
}

fn document_from_response(decrypt_url: &str, response: SuccessResponse) -> Result<FetchedDocument> {
	let revision = response.revision.trim().to_string();
	let ttl_seconds = response.ttl_seconds;
	let supports_sse = response.supports_sse;

	if response.encrypted {
		let ciphertext = response.encrypted_data.unwrap_or_default();
		let feed = decrypt_feed_document_for_setup_url(decrypt_url, &ciphertext)?;
		return Ok(FetchedDocument {
			revision,
			ttl_seconds,
			supports_sse,
			encrypted_data: Some(ciphertext),
			feed,
		});
	}

	// Validation guarantees data is present when encrypted=false.
	let feed = response
		.data
		.ok_or_else(|| FeedError::non_retriable("data is required when encrypted=false"))?;
	Ok(FetchedDocument {
		revision,
		ttl_seconds,
		supports_sse,
		encrypted_data: None,
		feed,
	})
}

/// Performs the HTTP exchange. `Ok(None)` is a 304.
async fn fetch_success_response(
	client: &Client,
	url: &str,
	if_none_match: &str,
) -> Result<Option<SuccessResponse>> {
	let mut request = client
		.get(request_url_without_fragment(url)?)
		.header(ACCEPT, "application/json")
		.timeout(FETCH_TIMEOUT);
	if let Some(tag) = format_if_none_match(if_none_match) {
		request = request.header(IF_NONE_MATCH, tag);
	}

	let response = request.send().await?;
	let status = response.status();
	match status {
		StatusCode::NOT_MODIFIED => return Ok(None),
		StatusCode::OK => {}
		_ => {
			let is_json = content_type_is_json(&response);
			let body = response.bytes().await.unwrap_or_default();
			return Err(error_for_status(url, status, is_json, &body));
		}
	}

	let body = response.bytes().await?;
	let parsed = decode_success_response(&body)?;
	Ok(Some(parsed))
}

pub(crate) fn decode_success_response(body: &[u8]) -> Result<SuccessResponse> {
	let response: SuccessResponse = serde_json::from_slice(body)?;
	response.validate()?;
	Ok(response)
}

/// Non-2xx bodies may carry a wg-feed error envelope, but clients must not
/// assume it.
pub(crate) fn error_for_status(
	url: &str,
	status: StatusCode,
	is_json: bool,
	body: &[u8],
) -> FeedError {
	if is_json {
		if let Some(envelope) = try_decode_error_response(body) {
			return FeedError::Protocol {
				status: status.as_u16(),
				message: envelope.message,
				retriable: envelope.retriable,
			};
		}
	}
	let snippet = String::from_utf8_lossy(&body[..body.len().min(BODY_SNIPPET_LIMIT)]).into_owned();
	FeedError::UnexpectedStatus {
		url: redact_url(url),
		status: status.as_u16(),
		body: snippet,
	}
}

fn try_decode_error_response(body: &[u8]) -> Option<ErrorResponse> {
	let envelope: ErrorResponse = serde_json::from_slice(body).ok()?;
	envelope.validate().ok()?;
	Some(envelope)
}

pub(crate) fn content_type_is_json(response: &reqwest::Response) -> bool {
	content_type(response).starts_with("application/json")
}

pub(crate) fn content_type(response: &reqwest::Response) -> String {
	response
		.headers()
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.unwrap_or("")
		.to_ascii_lowercase()
}

/// The fragment carries the age key and must never reach the wire, so it
/// is stripped before the request is built. Only the setup URL can carry
/// one; document endpoints are validated fragment-free.
pub(crate) fn request_url_without_fragment(raw: &str) -> Result<Url> {
	let mut url = Url::parse(raw.trim())?;
	url.set_fragment(None);
	Ok(url)
}

/// Servers set ETag to a quoted entity-tag whose payload equals the
/// revision; the conditional request echoes that form.
fn format_if_none_match(revision: &str) -> Option<String> {
	let revision = revision.trim();
	if revision.is_empty() {
		return None;
	}
	Some(format!("\"{revision}\""))
}
