// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP response envelopes of the `wg-feed-00` wire protocol.

use serde::{Deserialize, Serialize};

use crate::document::FeedDocument;
use crate::validate::ValidationError;
use crate::PROTOCOL_VERSION;

/// Successful feed response. Exactly one of `encrypted_data` (when
/// `encrypted`) or `data` (when not) is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
	pub version: String,
	pub success: bool,
	/// Opaque per-feed revision token, also the server's ETag payload.
	pub revision: String,
	pub ttl_seconds: i64,
	#[serde(default)]
	pub supports_sse: bool,
	#[serde(default)]
	pub encrypted: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub encrypted_data: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<FeedDocument>,
}

/// Error envelope. `retriable` is the single authority on whether the
/// client may retry against the same endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub version: String,
	pub success: bool,
	pub message: String,
	pub retriable: bool,
}

impl SuccessResponse {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.version != PROTOCOL_VERSION {
			return Err(ValidationError::new(format!(
				"version must be {PROTOCOL_VERSION}"
			)));
		}
		if !self.success {
			return Err(ValidationError::new("success must be true"));
		}
		if self.revision.trim().is_empty() {
			return Err(ValidationError::new("revision is required"));
		}
		if self.ttl_seconds < 0 {
			return Err(ValidationError::new("ttl_seconds must be >= 0"));
		}
		let has_ciphertext = self
			.encrypted_data
			.as_deref()
			.map(str::trim)
			.unwrap_or("")
			!= "";
		if self.encrypted {
			if !has_ciphertext {
				return Err(ValidationError::new(
					"encrypted_data is required when encrypted=true",
				));
			}
			if self.data.is_some() {
				return Err(ValidationError::new(
					"data must be omitted when encrypted=true",
				));
			}
			return Ok(());
		}
		if has_ciphertext {
			return Err(ValidationError::new(
				"encrypted_data must be omitted when encrypted=false",
			));
		}
		match &self.data {
			None => Err(ValidationError::new("data is required when encrypted=false")),
			Some(doc) => doc.validate().map_err(|e| e.in_field("data")),
		}
	}
}

impl ErrorResponse {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.version != PROTOCOL_VERSION {
			return Err(ValidationError::new(format!(
				"version must be {PROTOCOL_VERSION}"
			)));
		}
		if self.success {
			return Err(ValidationError::new("success must be false"));
		}
		if self.message.trim().is_empty() {
			return Err(ValidationError::new("message is required"));
		}
		Ok(())
	}
}
