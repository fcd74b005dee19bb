// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The feed document: a published bundle of WireGuard tunnel configurations.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::validate::ValidationError;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
	)
	.unwrap()
});

static TUNNEL_NAME_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap());

/// A feed: the full set of tunnels a publisher distributes to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDocument {
	/// UUIDv4-shaped feed id.
	pub id: String,
	/// HTTPS endpoints this document can be re-fetched from, in publisher
	/// preference order. Never carries fragments.
	pub endpoints: Vec<String>,
	#[serde(
		rename = "warning_message",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub warning_message: Option<String>,
	pub display_info: DisplayInfo,
	pub tunnels: Vec<Tunnel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
	/// Unique within the document.
	pub id: String,
	pub name: String,
	pub display_info: DisplayInfo,
	#[serde(default)]
	pub enabled: bool,
	/// When true the publisher dictates `enabled` on every update; when
	/// false the document value is only the initial default.
	#[serde(default)]
	pub forced: bool,
	pub wg_quick_config: String,
}

impl FeedDocument {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if !UUID_RE.is_match(&self.id) {
			return Err(ValidationError::new("id must be a UUID"));
		}
		if self.endpoints.is_empty() {
			return Err(ValidationError::new(
				"endpoints must contain at least one item",
			));
		}
		for (i, raw) in self.endpoints.iter().enumerate() {
			validate_endpoint(raw).map_err(|e| e.in_field(format!("endpoints[{i}]")))?;
		}
		if let Some(msg) = &self.warning_message {
			if !msg.is_empty() && msg.trim().is_empty() {
				return Err(ValidationError::new(
					"warning_message must be non-empty when present",
				));
			}
		}
		self.display_info
			.validate()
			.map_err(|e| e.in_field("display_info"))?;

		let mut seen_ids = std::collections::HashSet::with_capacity(self.tunnels.len());
		for (i, tunnel) in self.tunnels.iter().enumerate() {
			tunnel
				.validate()
				.map_err(|e| e.in_field(format!("tunnels[{i}]")))?;
			if !seen_ids.insert(tunnel.id.as_str()) {
				return Err(ValidationError::new(format!(
					"tunnels[{i}].id duplicates another tunnel id"
				)));
			}
		}
		Ok(())
	}
}

impl DisplayInfo {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.title.trim().is_empty() {
			return Err(ValidationError::new("title is required"));
		}
		if let Some(icon) = &self.icon_url {
			if !icon.is_empty() {
				validate_icon_url(icon).map_err(|e| e.in_field("icon_url"))?;
			}
		}
		Ok(())
	}
}

impl Tunnel {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.id.trim().is_empty() {
			return Err(ValidationError::new("id is required"));
		}
		if self.name.trim().is_empty() {
			return Err(ValidationError::new("name is required"));
		}
		if !TUNNEL_NAME_RE.is_match(&self.name) {
			return Err(ValidationError::new(format!(
				"name must match {}",
				TUNNEL_NAME_RE.as_str()
			)));
		}
		self.display_info
			.validate()
			.map_err(|e| e.in_field("display_info"))?;
		if self.wg_quick_config.trim().is_empty() {
			return Err(ValidationError::new("wg_quick_config is required"));
		}
		Ok(())
	}
}

fn validate_endpoint(raw: &str) -> Result<(), ValidationError> {
	let url = Url::parse(raw.trim()).map_err(|_| ValidationError::new("invalid url"))?;
	if url.scheme() != "https" {
		return Err(ValidationError::new("scheme must be https"));
	}
	if url.host_str().map(str::trim).unwrap_or("").is_empty() {
		return Err(ValidationError::new("host is required"));
	}
	if url.fragment().map(str::trim).unwrap_or("") != "" {
		return Err(ValidationError::new("fragment must be omitted"));
	}
	Ok(())
}

// Schema and draft require an SVG data: URL (image/svg+xml).
fn validate_icon_url(raw: &str) -> Result<(), ValidationError> {
	let s = raw.trim().to_lowercase();
	let Some(rest) = s.strip_prefix("data:") else {
		return Err(ValidationError::new("must be a data: URL"));
	};
	let Some(tail) = rest.strip_prefix("image/svg+xml") else {
		return Err(ValidationError::new(
			"must be an SVG data: URL (image/svg+xml)",
		));
	};
	// The media type must be followed by parameters or the data separator.
	match tail.as_bytes().first() {
		Some(b';') | Some(b',') => Ok(()),
		_ => Err(ValidationError::new("invalid data: URL")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid_document() -> FeedDocument {
		FeedDocument {
			id: "11111111-1111-4111-8111-111111111111".to_string(),
			endpoints: vec!["https://feeds.example.com/x".to_string()],
			warning_message: None,
			display_info: DisplayInfo {
				title: "Home network".to_string(),
				description: None,
				icon_url: None,
			},
			tunnels: vec![Tunnel {
				id: "t1".to_string(),
				name: "home".to_string(),
				display_info: DisplayInfo {
					title: "Home".to_string(),
					description: None,
					icon_url: None,
				},
				enabled: true,
				forced: false,
				wg_quick_config: "[Interface]\nPrivateKey = x\n".to_string(),
			}],
		}
	}

	#[test]
	fn test_valid_document_passes() {
		valid_document().validate().unwrap();
	}

	#[test]
	fn test_rejects_non_uuid_id() {
		let mut doc = valid_document();
		doc.id = "not-a-uuid".to_string();
		let err = doc.validate().unwrap_err();
		assert!(err.message().contains("id must be a UUID"));
	}

	#[test]
	fn test_rejects_empty_endpoints() {
		let mut doc = valid_document();
		doc.endpoints.clear();
		assert!(doc.validate().is_err());
	}

	#[test]
	fn test_rejects_http_endpoint() {
		let mut doc = valid_document();
		doc.endpoints = vec!["http://feeds.example.com/x".to_string()];
		let err = doc.validate().unwrap_err();
		assert!(err.message().contains("scheme must be https"));
	}

	#[test]
	fn test_rejects_endpoint_with_fragment() {
		let mut doc = valid_document();
		doc.endpoints = vec!["https://feeds.example.com/x#secret".to_string()];
		let err = doc.validate().unwrap_err();
		assert!(err.message().contains("fragment must be omitted"));
	}

	#[test]
	fn test_rejects_blank_warning_message() {
		let mut doc = valid_document();
		doc.warning_message = Some("   ".to_string());
		assert!(doc.validate().is_err());
	}

	#[test]
	fn test_rejects_duplicate_tunnel_ids() {
		let mut doc = valid_document();
		let dup = doc.tunnels[0].clone();
		doc.tunnels.push(dup);
		let err = doc.validate().unwrap_err();
		assert!(err.message().contains("duplicates"));
	}

	#[test]
	fn test_rejects_bad_tunnel_name() {
		let mut doc = valid_document();
		doc.tunnels[0].name = "9lives".to_string();
		assert!(doc.validate().is_err());
		doc.tunnels[0].name = "has space".to_string();
		assert!(doc.validate().is_err());
		doc.tunnels[0].name = "ok-Name2".to_string();
		doc.validate().unwrap();
	}

	#[test]
	fn test_icon_url_must_be_svg_data_url() {
		let mut doc = valid_document();
		doc.display_info.icon_url = Some("https://example.com/icon.svg".to_string());
		assert!(doc.validate().is_err());

		doc.display_info.icon_url = Some("data:image/png;base64,AAAA".to_string());
		assert!(doc.validate().is_err());

		doc.display_info.icon_url = Some("data:image/svg+xml".to_string());
		assert!(doc.validate().is_err());

		doc.display_info.icon_url = Some("data:image/svg+xml;base64,PHN2Zy8+".to_string());
		doc.validate().unwrap();

		doc.display_info.icon_url = Some("data:image/svg+xml,<svg/>".to_string());
		doc.validate().unwrap();
	}

	#[test]
	fn test_tunnel_defaults_deserialize_false() {
		let json = r#"{
			"id": "t1",
			"name": "home",
			"display_info": {"title": "Home"},
			"wg_quick_config": "[Interface]\nPrivateKey = x\n"
		}"#;
		let tunnel: Tunnel = serde_json::from_str(json).unwrap();
		assert!(!tunnel.enabled);
		assert!(!tunnel.forced);
	}

	#[test]
	fn test_document_requires_tunnels_key() {
		let json = r#"{
			"id": "11111111-1111-4111-8111-111111111111",
			"endpoints": ["https://feeds.example.com/x"],
			"display_info": {"title": "x"}
		}"#;
		assert!(serde_json::from_str::<FeedDocument>(json).is_err());
	}

	#[test]
	fn test_document_allows_empty_tunnels() {
		let mut doc = valid_document();
		doc.tunnels.clear();
		doc.validate().unwrap();
	}
}
