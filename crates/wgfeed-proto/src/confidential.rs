// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end confidentiality: age decryption keyed by the setup URL
//! fragment.
//!
//! The fragment is the age X25519 secret key with its `AGE-SECRET-KEY-`
//! prefix removed and the remainder lowercased. It never leaves the
//! process: reconstruction happens here and the resulting identity is
//! dropped as soon as the document is decrypted.

use std::io::Read;

use age::armor::ArmoredReader;
use age::x25519::Identity;
use url::Url;

use crate::error::{FeedError, Result};
use wgfeed_model::FeedDocument;

const AGE_SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-";

fn identity_from_url(raw: &str) -> Result<Option<Identity>> {
	let url = Url::parse(raw.trim())?;
	let fragment = url.fragment().map(str::trim).unwrap_or("");
	if fragment.is_empty() {
		return Ok(None);
	}
	let key = format!("{AGE_SECRET_KEY_PREFIX}{}", fragment.to_uppercase());
	let identity = key
		.parse::<Identity>()
		.map_err(|_| FeedError::non_retriable("failed to parse age identity from URL fragment"))?;
	Ok(Some(identity))
}

/// Decrypts an armored ciphertext using the age key carried in the setup
/// URL fragment and validates the plaintext as a feed document.
///
/// Every failure on this path is a non-retriable protocol error: a wrong or
/// missing key, tampered ciphertext, or an invalid decrypted document all
/// indicate misconfiguration no retry can fix.
pub fn decrypt_feed_document_for_setup_url(
	setup_url: &str,
	armored_ciphertext: &str,
) -> Result<FeedDocument> {
	let Some(identity) = identity_from_url(setup_url)? else {
		return Err(FeedError::non_retriable(
			"encrypted success response but no age key provided in URL fragment",
		));
	};

	let reader = ArmoredReader::new(armored_ciphertext.as_bytes());
	let decryptor = age::Decryptor::new(reader)
		.map_err(|_| FeedError::non_retriable("failed to decrypt encrypted_data"))?;
	let mut plaintext = Vec::new();
	match decryptor {
		age::Decryptor::Recipients(d) => {
			let mut reader = d
				.decrypt(std::iter::once(&identity as &dyn age::Identity))
				.map_err(|_| FeedError::non_retriable("failed to decrypt encrypted_data"))?;
			reader
				.read_to_end(&mut plaintext)
				.map_err(|_| FeedError::non_retriable("failed to decrypt encrypted_data"))?;
		}
		age::Decryptor::Passphrase(_) => {
			return Err(FeedError::non_retriable("failed to decrypt encrypted_data"));
		}
	}

	let document: FeedDocument = serde_json::from_slice(&plaintext)
		.map_err(|_| FeedError::non_retriable("decrypted feed document is not valid JSON"))?;
	document
		.validate()
		.map_err(|_| FeedError::non_retriable("decrypted feed document failed validation"))?;
	Ok(document)
}
