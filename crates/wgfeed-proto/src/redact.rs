// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sha2::{Digest, Sha256};
use url::Url;

/// Returns a stable, non-secret representation of a setup URL for logs.
///
/// The form is `<scheme>://<host>#<first-4-bytes-of-SHA256(url)-hex>`;
/// userinfo, port, path, query, and fragment are all dropped. URLs that do
/// not parse degrade to `feed#<hash>`.
pub fn redact_url(raw: &str) -> String {
	let raw = raw.trim();
	if raw.is_empty() {
		return "feed#empty".to_string();
	}

	let digest = Sha256::digest(raw.as_bytes());
	let id = hex::encode(&digest[..4]);

	match Url::parse(raw) {
		Ok(url) => match url.host_str() {
			Some(host) if !host.is_empty() => format!("{}://{}#{}", url.scheme(), host, id),
			_ => format!("feed#{id}"),
		},
		Err(_) => format!("feed#{id}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_redacted_form_has_scheme_host_hash() {
		let out = redact_url("https://feeds.example.com/path?q=1#secretfragment");
		assert!(out.starts_with("https://feeds.example.com#"));
		let hash = out.rsplit('#').next().unwrap();
		assert_eq!(hash.len(), 8);
	}

	#[test]
	fn test_fragment_never_appears() {
		let out = redact_url("https://h/x#agesecretkeymaterial");
		assert!(!out.contains("agesecretkeymaterial"));
		assert!(!out.contains("/x"));
	}

	#[test]
	fn test_stable_for_same_input() {
		let a = redact_url("https://h/x#k");
		let b = redact_url("https://h/x#k");
		assert_eq!(a, b);
	}

	#[test]
	fn test_differs_with_fragment() {
		// The hash covers the whole raw URL, fragment included.
		assert_ne!(redact_url("https://h/x#one"), redact_url("https://h/x#two"));
	}

	#[test]
	fn test_degrades_on_garbage() {
		assert!(redact_url("not a url").starts_with("feed#"));
		assert_eq!(redact_url(""), "feed#empty");
	}
}
