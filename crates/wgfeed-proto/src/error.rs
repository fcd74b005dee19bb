// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use wgfeed_model::ValidationError;

/// Errors surfaced by the protocol client.
///
/// Only [`FeedError::Protocol`] with `retriable: false` is terminal for a
/// feed task; every other variant means the caller may retry on the same or
/// another endpoint.
#[derive(Debug, Error)]
pub enum FeedError {
	/// A structured error envelope from the server. `retriable` is the
	/// single authority on whether to retry against this endpoint.
	#[error("wg-feed error: status={status} message={message:?} retriable={retriable}")]
	Protocol {
		status: u16,
		message: String,
		retriable: bool,
	},

	/// The endpoint answered 200 with a non-SSE content type; callers fall
	/// back to polling instead of trying other endpoints.
	#[error("stream not supported")]
	StreamNotSupported,

	/// Non-2xx without a decodable error envelope. `url` is redacted.
	#[error("GET {url}: unexpected status {status}: {body}")]
	UnexpectedStatus {
		url: String,
		status: u16,
		body: String,
	},

	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("decode response: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("validate response: {0}")]
	Validate(#[from] ValidationError),

	#[error("SSE stream error: {0}")]
	Stream(String),

	#[error("no endpoints")]
	NoEndpoints,

	#[error("all endpoints failed")]
	AllEndpointsFailed,

	#[error("parse url: {0}")]
	Url(#[from] url::ParseError),

	/// Retriable catch-all for failures raised by event handlers.
	#[error("{0}")]
	Other(String),
}

impl FeedError {
	/// True when a retry (same or next endpoint) is allowed.
	pub fn is_retriable(&self) -> bool {
		!matches!(
			self,
			FeedError::Protocol {
				retriable: false,
				..
			}
		)
	}

	pub(crate) fn non_retriable(message: impl Into<String>) -> Self {
		FeedError::Protocol {
			status: 200,
			message: message.into(),
			retriable: false,
		}
	}
}

pub type Result<T> = std::result::Result<T, FeedError>;
