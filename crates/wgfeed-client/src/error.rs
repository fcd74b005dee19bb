// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use wgfeed_backend::BackendError;
use wgfeed_proto::FeedError;
use wgfeed_state::StateError;

#[derive(Debug, Error)]
pub enum ClientError {
	/// Fatal at process start; never retried.
	#[error("config error: {0}")]
	Config(String),

	#[error(transparent)]
	Feed(#[from] FeedError),

	#[error(transparent)]
	Backend(#[from] BackendError),

	#[error(transparent)]
	State(#[from] StateError),

	/// `url` is the redacted setup URL.
	#[error("feed {url}: missing id")]
	MissingFeedId { url: String },

	#[error("unexpected 304 response to an unconditional fetch")]
	UnexpectedNotModified,

	#[error("cache reconcile throttled")]
	CacheThrottled,

	#[error("no cached config")]
	NoCachedConfig,

	#[error("feed task failed: {0}")]
	TaskFailed(String),
}

impl ClientError {
	/// A non-retriable protocol error quiesces the feed task; everything
	/// else may be retried.
	pub fn is_retriable(&self) -> bool {
		match self {
			ClientError::Feed(feed) => feed.is_retriable(),
			_ => true,
		}
	}
}
