// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal editor for NetworkManager keyfiles (INI with sections).
//!
//! The editor is line-oriented: every line it does not touch is kept
//! byte-for-byte, so sections and keys written by NetworkManager or the
//! administrator survive a round-trip unchanged. Only keys passed to
//! [`Keyfile::set`] are rewritten.

#[derive(Debug, Clone, Default)]
pub struct Keyfile {
	/// Raw lines before the first section header.
	prelude: Vec<String>,
	sections: Vec<Section>,
}

#[derive(Debug, Clone)]
struct Section {
	name: String,
	/// The header line exactly as read (or as created).
	header: String,
	lines: Vec<Line>,
}

#[derive(Debug, Clone)]
enum Line {
	/// A `key=value` line. `raw` is the full line as read or rewritten.
	Pair { key: String, raw: String },
	/// Comment, blank, or anything else; preserved verbatim.
	Raw(String),
}

impl Keyfile {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parses keyfile bytes. Parsing is permissive: unrecognizable lines
	/// are preserved as-is rather than rejected.
	pub fn parse(bytes: &[u8]) -> Self {
		let text = String::from_utf8_lossy(bytes);
		let mut file = Keyfile::new();

		let mut lines: Vec<&str> = text.split('\n').collect();
		if lines.last() == Some(&"") {
			lines.pop();
		}

		for raw in lines {
			let trimmed = raw.trim();
			if trimmed.starts_with('[') && trimmed.ends_with(']') {
				file.sections.push(Section {
					name: trimmed[1..trimmed.len() - 1].trim().to_string(),
					header: raw.to_string(),
					lines: Vec::new(),
				});
				continue;
			}

			let line = if !trimmed.starts_with('#')
				&& !trimmed.starts_with(';')
				&& trimmed.contains('=')
			{
				let key = raw.split_once('=').map(|(k, _)| k.trim().to_string());
				match key {
					Some(key) if !key.is_empty() => Line::Pair {
						key,
						raw: raw.to_string(),
					},
					_ => Line::Raw(raw.to_string()),
				}
			} else {
				Line::Raw(raw.to_string())
			};

			match file.sections.last_mut() {
				Some(section) => section.lines.push(line),
				None => file.prelude.push(raw.to_string()),
			}
		}
		file
	}

	pub fn has_section(&self, name: &str) -> bool {
		self.sections.iter().any(|s| s.name == name)
	}

	/// Returns the trimmed value of `key` in `section`, if present.
	pub fn get(&self, section: &str, key: &str) -> Option<String> {
		let section = self.sections.iter().find(|s| s.name == section)?;
		section.lines.iter().find_map(|line| match line {
			Line::Pair { key: k, raw } if k == key => {
				raw.split_once('=').map(|(_, v)| v.trim().to_string())
			}
			_ => None,
		})
	}

	/// Sets `key` in `section`, rewriting the existing line in place or
	/// appending. Missing sections are created at the end of the file.
	pub fn set(&mut self, section: &str, key: &str, value: &str) {
		if section.trim().is_empty() || key.trim().is_empty() {
			return;
		}

		let rendered = format!("{key}={value}");
		let section = match self.sections.iter_mut().find(|s| s.name == section) {
			Some(section) => section,
			None => {
				self.sections.push(Section {
					name: section.to_string(),
					header: format!("[{section}]"),
					lines: Vec::new(),
				});
				self.sections.last_mut().unwrap()
			}
		};

		for line in &mut section.lines {
			if let Line::Pair { key: k, raw } = line {
				if k == key {
					*raw = rendered;
					return;
				}
			}
		}

		// Append before any trailing blank lines so sections stay visually
		// separated.
		let insert_at = section
			.lines
			.iter()
			.rposition(|line| !matches!(line, Line::Raw(raw) if raw.trim().is_empty()))
			.map(|i| i + 1)
			.unwrap_or(0);
		section.lines.insert(
			insert_at,
			Line::Pair {
				key: key.to_string(),
				raw: rendered,
			},
		);
	}

	/// Deletes exactly those sections whose names begin with `prefix`.
	pub fn remove_sections_with_prefix(&mut self, prefix: &str) {
		if prefix.is_empty() {
			return;
		}
		self.sections.retain(|s| !s.name.starts_with(prefix));
	}

	/// Serializes the keyfile. Output always ends with a newline.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = String::new();
		for line in &self.prelude {
			out.push_str(line);
			out.push('\n');
		}
		for section in &self.sections {
			out.push_str(&section.header);
			out.push('\n');
			for line in &section.lines {
				match line {
					Line::Pair { raw, .. } | Line::Raw(raw) => {
						out.push_str(raw);
						out.push('\n');
					}
				}
			}
		}
		if out.is_empty() {
			out.push('\n');
		}
		out.into_bytes()
	}
}
