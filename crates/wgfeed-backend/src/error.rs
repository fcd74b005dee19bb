// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
	/// The external tool exited non-zero. `command` is the quoted argv.
	#[error("exec {command}: {stderr}")]
	CommandFailed { command: String, stderr: String },

	/// The external tool could not be started at all.
	#[error("exec {command}: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("parse wg-quick config: {0}")]
	WgQuickConfig(String),

	#[error("{0}")]
	InvalidInput(String),

	#[error("unknown backend {0:?}")]
	UnknownBackend(String),
}
