// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// A feed document or response envelope failed validation.
///
/// The message names the offending field using its wire name, with list
/// indices where applicable (`tunnels[2]: name is required`).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
	message: String,
}

impl ValidationError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}

	/// Prefixes the message with a field path, preserving the original text.
	pub fn in_field(self, field: impl AsRef<str>) -> Self {
		Self {
			message: format!("{}: {}", field.as_ref(), self.message),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}
