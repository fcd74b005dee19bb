// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Argv-based execution of the external WireGuard tooling.
//!
//! All subprocess invocations go through [`CommandRunner`] so tests can
//! substitute a recording fake. No shell is ever involved; failures carry
//! the quoted argv and the tool's trimmed stderr.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::error::BackendError;
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
	pub stdout: String,
	pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
	async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput>;
}

/// Runs commands on the host via `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
	async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput> {
		let command = shell_quote(program, args);
		trace!(cmd = %command, "running backend command");

		let output = Command::new(program)
			.args(args)
			.output()
			.await
			.map_err(|source| BackendError::Spawn {
				command: command.clone(),
				source,
			})?;

		let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
		let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
		if !output.status.success() {
			return Err(BackendError::CommandFailed {
				command,
				stderr: stderr.trim().to_string(),
			});
		}
		Ok(ExecOutput { stdout, stderr })
	}
}

/// Renders an argv for error messages and logs, quoting arguments that
/// contain whitespace or quoting characters.
pub fn shell_quote(program: &str, args: &[&str]) -> String {
	let mut parts = Vec::with_capacity(1 + args.len());
	parts.push(program.to_string());
	for arg in args {
		if arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '\\') {
			parts.push(format!("{arg:?}"));
		} else {
			parts.push(arg.to_string());
		}
	}
	parts.join(" ")
}

/// Recording fake used by the backend tests; behavior is keyed by argv
/// prefix.
#[cfg(test)]
pub(crate) mod testing {
	use super::*;
	use std::sync::Mutex;

	#[derive(Default)]
	pub(crate) struct FakeRunner {
		calls: Mutex<Vec<String>>,
		failures: Mutex<Vec<(String, String)>>,
		stdouts: Mutex<Vec<(String, String)>>,
	}

	impl FakeRunner {
		pub(crate) fn fail_on(&self, prefix: &str, stderr: &str) {
			self.failures
				.lock()
				.unwrap()
				.push((prefix.to_string(), stderr.to_string()));
		}

		pub(crate) fn stdout_for(&self, prefix: &str, stdout: &str) {
			self.stdouts
				.lock()
				.unwrap()
				.push((prefix.to_string(), stdout.to_string()));
		}

		pub(crate) fn calls(&self) -> Vec<String> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl CommandRunner for FakeRunner {
		async fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput> {
			let command = shell_quote(program, args);
			self.calls.lock().unwrap().push(command.clone());

			for (prefix, stderr) in self.failures.lock().unwrap().iter() {
				if command.starts_with(prefix.as_str()) {
					return Err(BackendError::CommandFailed {
						command,
						stderr: stderr.clone(),
					});
				}
			}
			for (prefix, stdout) in self.stdouts.lock().unwrap().iter() {
				if command.starts_with(prefix.as_str()) {
					return Ok(ExecOutput {
						stdout: stdout.clone(),
						stderr: String::new(),
					});
				}
			}
			Ok(ExecOutput::default())
		}
	}
}
