// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client core for wg-feed: configuration, the reconciliation engine, the
//! one-shot apply, and the daemon control loop.
//!
//! # Overview
//!
//! A setup URL both locates a feed and (optionally, via its fragment)
//! carries the age key that decrypts it. The client:
//!
//! 1. Resolves the feed id and endpoints, preferring cached encrypted data
//!    over a network bootstrap
//! 2. Obtains feed documents by SSE stream where supported, conditional
//!    polling otherwise
//! 3. Reconciles installed tunnels against each document, preserving the
//!    user's enable/disable choices for non-forced tunnels
//! 4. Persists state atomically after every change, keyed by salted URL
//!    hashes so the setup URL itself never touches disk

pub mod config;
pub mod daemon;
pub mod error;
pub mod once;
pub mod reconcile;

pub use config::ClientConfig;
pub use daemon::run as run_daemon;
pub use error::ClientError;
pub use once::run_once;
pub use reconcile::apply_feed;

pub type Result<T> = std::result::Result<T, ClientError>;
