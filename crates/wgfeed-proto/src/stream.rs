// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE streaming of feed updates.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::fetch::{content_type, content_type_is_json, error_for_status, request_url_without_fragment};

/// Receives decoded `feed` events from a stream. Implementations thread
/// their own mutable loop state; events arrive strictly in order.
#[async_trait]
pub trait StreamHandler: Send {
	/// Called once per delivered event with the endpoint that produced it
	/// and the raw event payload (a full SuccessResponse JSON blob).
	/// Returning an error aborts the stream with that error.
	async fn on_event(&mut self, endpoint: &str, payload: &str) -> Result<()>;
}

/// Opens an SSE stream for `url` and dispatches `feed` events to `handler`.
///
/// Returns [`FeedError::StreamNotSupported`] when the server answers 200
/// with a non-SSE content type. A clean upstream close ends the stream with
/// `Ok(())`; callers reconnect on their own schedule. Dropping the returned
/// future aborts the underlying request.
pub async fn stream_sse(client: &Client, url: &str, handler: &mut dyn StreamHandler) -> Result<()> {
	let response = client
		.get(request_url_without_fragment(url)?)
		.header(ACCEPT, "text/event-stream")
		.send()
		.await?;

	let status = response.status();
	if status != StatusCode::OK {
		let is_json = content_type_is_json(&response);
		let body = response.bytes().await.unwrap_or_default();
		return Err(error_for_status(url, status, is_json, &body));
	}
	if !content_type(&response).starts_with("text/event-stream") {
		return Err(FeedError::StreamNotSupported);
	}

	debug!(url = %crate::redact_url(url), "SSE stream established");

	let mut events = response.bytes_stream().eventsource();
	while let Some(event) = events.next().await {
		let event = event.map_err(|e| FeedError::Stream(e.to_string()))?;
		if event.event == "feed" && !event.data.is_empty() {
			handler.on_event(url, &event.data).await?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::response::sse::{Event, Sse};
	use axum::routing::get;
	use axum::Router;
	use std::convert::Infallible;

	struct Collector {
		payloads: Vec<String>,
	}

	#[async_trait]
	impl StreamHandler for Collector {
		async fn on_event(&mut self, _endpoint: &str, payload: &str) -> Result<()> {
			self.payloads.push(payload.to_string());
			Ok(())
		}
	}

	async fn serve(app: Router) -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{addr}")
	}

	#[tokio::test]
	async fn test_stream_delivers_feed_events_in_order() {
		let app = Router::new().route(
			"/feed",
			get(|| async {
				let events = futures::stream::iter(vec![
					Ok::<_, Infallible>(Event::default().event("feed").data(r#"{"revision":"rev-1"}"#)),
					Ok(Event::default().event("heartbeat").data("{}")),
					Ok(Event::default().event("feed").data(r#"{"revision":"rev-2"}"#)),
				]);
				Sse::new(events)
			}),
		);
		let base = serve(app).await;

		let mut collector = Collector { payloads: vec![] };
		let client = crate::new_http_client();
		stream_sse(&client, &format!("{base}/feed"), &mut collector)
			.await
			.unwrap();

		assert_eq!(
			collector.payloads,
			vec![
				r#"{"revision":"rev-1"}"#.to_string(),
				r#"{"revision":"rev-2"}"#.to_string()
			]
		);
	}

	#[tokio::test]
	async fn test_non_sse_content_type_is_sentinel() {
		let app = Router::new().route(
			"/feed",
			get(|| async { axum::Json(serde_json::json!({"ok": true})) }),
		);
		let base = serve(app).await;

		let mut collector = Collector { payloads: vec![] };
		let client = crate::new_http_client();
		let err = stream_sse(&client, &format!("{base}/feed"), &mut collector)
			.await
			.unwrap_err();
		assert!(matches!(err, FeedError::StreamNotSupported));
	}

	#[tokio::test]
	async fn test_error_envelope_on_stream_endpoint() {
		let app = Router::new().route(
			"/feed",
			get(|| async {
				(
					axum::http::StatusCode::FORBIDDEN,
					axum::Json(serde_json::json!({
						"version": "wg-feed-00",
						"success": false,
						"message": "revoked",
						"retriable": false
					})),
				)
			}),
		);
		let base = serve(app).await;

		let mut collector = Collector { payloads: vec![] };
		let client = crate::new_http_client();
		let err = stream_sse(&client, &format!("{base}/feed"), &mut collector)
			.await
			.unwrap_err();
		match err {
			FeedError::Protocol {
				status, retriable, ..
			} => {
				assert_eq!(status, 403);
				assert!(!retriable);
			}
			other => panic!("expected protocol error, got {other:?}"),
		}
	}

	struct FailingHandler;

	#[async_trait]
	impl StreamHandler for FailingHandler {
		async fn on_event(&mut self, _endpoint: &str, _payload: &str) -> Result<()> {
			Err(FeedError::Stream("handler rejected event".to_string()))
		}
	}

	#[tokio::test]
	async fn test_handler_error_aborts_stream() {
		let app = Router::new().route(
			"/feed",
			get(|| async {
				let events = futures::stream::iter(vec![Ok::<_, Infallible>(
					Event::default().event("feed").data("{}"),
				)]);
				Sse::new(events)
			}),
		);
		let base = serve(app).await;

		let client = crate::new_http_client();
		let err = stream_sse(&client, &format!("{base}/feed"), &mut FailingHandler)
			.await
			.unwrap_err();
		assert!(matches!(err, FeedError::Stream(_)));
	}
}
