// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted client state for wg-feed.
//!
//! The state file records which feeds this installation manages and which
//! tunnels each feed installed, without ever storing a setup URL: URLs are
//! keyed by a salted HMAC-SHA-256 of their canonical, fragment-free form.
//! Saves are atomic (tmp file + rename) so a crash mid-write never corrupts
//! the previous state.

pub mod store;
pub mod url_key;

pub use store::{FeedState, State, StateError, TunnelState};
pub use url_key::canonical_url_no_fragment;
