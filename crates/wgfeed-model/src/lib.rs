// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire-protocol data model for wg-feed.
//!
//! This crate defines the feed document and the HTTP response envelopes of
//! the `wg-feed-00` protocol, together with their validation rules. Every
//! document or envelope that crosses the wire is validated here before any
//! other layer acts on it.

pub mod document;
pub mod envelope;
mod validate;

pub use document::{DisplayInfo, FeedDocument, Tunnel};
pub use envelope::{ErrorResponse, SuccessResponse};
pub use validate::ValidationError;

/// Protocol version accepted by this client.
pub const PROTOCOL_VERSION: &str = "wg-feed-00";
