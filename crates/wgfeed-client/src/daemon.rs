// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Daemon control loop: one task per setup URL, reconciling forever.
//!
//! Each task walks the same state machine: bootstrap from cached encrypted
//! data, bootstrap over the network if endpoints are still unknown, then
//! prefer an SSE stream and fall back to conditional polling. Retriable
//! failures sleep and retry; a non-retriable protocol error quiesces the
//! task until shutdown. When every endpoint is unreachable the task
//! re-applies the cached encrypted document (throttled to once a minute) so
//! a device that boots offline still gets its tunnels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use wgfeed_backend::{new_backend, Backend};
use wgfeed_proto::{
	decode_success_payload, decrypt_feed_document_for_setup_url, fetch_any_endpoints,
	new_http_client, redact_url, stream_any_endpoints, FeedError, FetchOutcome, FetchedDocument,
	StreamHandler,
};
use wgfeed_state::State;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reconcile::apply_feed;
use crate::Result;

const DEFAULT_TICK_ON_FAILURE: Duration = Duration::from_secs(60);
const MIN_TICK: Duration = Duration::from_secs(5);
const DEFAULT_RECONCILE_TICK: Duration = Duration::from_secs(60);
const STREAM_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Runs one reconciliation task per configured setup URL until `shutdown`
/// flips or a task fails fatally.
pub async fn run(config: ClientConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
	let backend = new_backend(config.backend);
	run_with_backend(config, backend, shutdown).await
}

pub async fn run_with_backend(
	config: ClientConfig,
	backend: Arc<dyn Backend>,
	mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
	let daemon = Arc::new(Daemon::new(config, backend));

	let mut tasks = JoinSet::new();
	for setup_url in daemon.config.setup_urls.clone() {
		let daemon = Arc::clone(&daemon);
		let shutdown = shutdown.clone();
		tasks.spawn(async move {
			let result = daemon.run_feed(&setup_url, shutdown).await;
			if let Err(e) = &result {
				warn!(feed = %redact_url(&setup_url), error = %e, "feed loop exited");
			}
			result
		});
	}

	loop {
		tokio::select! {
			_ = shutdown_signal(&mut shutdown) => return Ok(()),
			joined = tasks.join_next() => match joined {
				// A gracefully finished task (lost claim) leaves the rest
				// running; an error takes the daemon down.
				Some(Ok(Ok(()))) => continue,
				Some(Ok(Err(e))) => return Err(e),
				Some(Err(e)) => return Err(ClientError::TaskFailed(e.to_string())),
				None => return Ok(()),
			},
		}
	}
}

struct Daemon {
	config: ClientConfig,
	backend: Arc<dyn Backend>,
	http: reqwest::Client,
	/// Guards every load -> mutate -> save cycle of the state file.
	state_lock: tokio::sync::Mutex<()>,
	/// feed id -> setup URL. Insert-if-absent; the losing task exits.
	claimed: std::sync::Mutex<HashMap<String, String>>,
}

/// Per-task loop state threaded through the phases.
#[derive(Default)]
struct FeedLoopState {
	feed_id: String,
	endpoints: Vec<String>,
	last_revision: String,
	last_ttl: Option<i64>,
	next_cache_reconcile: Option<Instant>,
}

impl Daemon {
	fn new(config: ClientConfig, backend: Arc<dyn Backend>) -> Self {
		Self {
			config,
			backend,
			http: new_http_client(),
			state_lock: tokio::sync::Mutex::new(()),
			claimed: std::sync::Mutex::new(HashMap::new()),
		}
	}

	async fn run_feed(&self, setup_url: &str, mut shutdown: watch::Receiver<bool>) -> Result<()> {
		let setup_url = setup_url.trim().to_string();
		let mut loop_state = FeedLoopState::default();

		// Resolve feed id and endpoints from cached encrypted data before
		// any network bootstrap.
		let (resolved_id, resolved_endpoints) = self.resolve_from_state_cache(&setup_url).await?;
		if !resolved_id.trim().is_empty() {
			loop_state.feed_id = resolved_id.trim().to_string();
			if !self.claim_feed(&loop_state.feed_id, &setup_url) {
				return Ok(());
			}
		}
		loop_state.endpoints = resolved_endpoints;

		loop {
			if *shutdown.borrow() {
				return Ok(());
			}

			if loop_state.endpoints.is_empty() {
				if !self
					.bootstrap_over_network(&setup_url, &mut loop_state, &mut shutdown)
					.await?
				{
					return Ok(());
				}
				continue;
			}

			// Prefer SSE when available.
			let (stream_result, aftermath) = tokio::select! {
				res = self.stream_once(&setup_url, &mut loop_state) => res,
				_ = shutdown_signal(&mut shutdown) => return Ok(()),
			};
			if *shutdown.borrow() {
				return Ok(());
			}
			if aftermath.claim_lost {
				return Ok(());
			}

			if let Some(failure) = aftermath.failure {
				if !failure.is_retriable() {
					warn!(
						feed = %redact_url(&setup_url),
						error = %failure,
						"non-retriable feed error; stopping automatic reconnect"
					);
					shutdown_signal(&mut shutdown).await;
					return Ok(());
				}
				warn!(feed = %redact_url(&setup_url), error = %failure, "stream reconcile failed; retrying");
				self.cache_reconcile_tick(&setup_url, &mut loop_state).await;
				sleep_or_shutdown(&mut shutdown, STREAM_RETRY_DELAY).await;
				continue;
			}

			match stream_result {
				Err(FeedError::StreamNotSupported) => {
					let probe = tokio::select! {
						res = fetch_any_endpoints(&self.http, &loop_state.endpoints, &setup_url, "") => res,
						_ = shutdown_signal(&mut shutdown) => return Ok(()),
					};
					if let Ok((FetchOutcome::Document(doc), _)) = &probe {
						if doc.supports_sse {
							info!(
								feed = %redact_url(&setup_url),
								"stream not supported but supports_sse=true; retrying stream"
							);
							continue;
						}
					}
					info!(feed = %redact_url(&setup_url), "stream not supported; using polling");
					return self.poll_loop(&setup_url, &mut loop_state, shutdown).await;
				}
				Err(e) if !e.is_retriable() => {
					warn!(
						feed = %redact_url(&setup_url),
						error = %e,
						"non-retriable feed error; stopping automatic reconnect"
					);
					shutdown_signal(&mut shutdown).await;
					return Ok(());
				}
				Ok(()) => {
					info!(feed = %redact_url(&setup_url), "stream ended; reconnecting");
					self.cache_reconcile_tick(&setup_url, &mut loop_state).await;
					sleep_or_shutdown(&mut shutdown, STREAM_RETRY_DELAY).await;
				}
				Err(e) => {
					warn!(feed = %redact_url(&setup_url), error = %e, "stream error; retrying");
					self.cache_reconcile_tick(&setup_url, &mut loop_state).await;
					sleep_or_shutdown(&mut shutdown, STREAM_RETRY_DELAY).await;
				}
			}
		}
	}

	/// One network bootstrap attempt against the setup URL itself. Returns
	/// false when the task must exit (claim lost).
	async fn bootstrap_over_network(
		&self,
		setup_url: &str,
		loop_state: &mut FeedLoopState,
		shutdown: &mut watch::Receiver<bool>,
	) -> Result<bool> {
		let bootstrap_endpoints = vec![setup_url.to_string()];
		let fetched = tokio::select! {
			res = fetch_any_endpoints(&self.http, &bootstrap_endpoints, setup_url, "") => res,
			_ = shutdown_signal(shutdown) => return Ok(true),
		};

		let doc = match fetched {
			Ok((FetchOutcome::Document(doc), _)) => doc,
			Ok((FetchOutcome::NotModified { .. }, _)) => {
				return Err(ClientError::UnexpectedNotModified);
			}
			Err(e) if !e.is_retriable() => return Err(e.into()),
			Err(e) => {
				warn!(feed = %redact_url(setup_url), error = %e, "bootstrap fetch failed");
				self.cache_reconcile_tick(setup_url, loop_state).await;
				sleep_or_shutdown(shutdown, DEFAULT_TICK_ON_FAILURE).await;
				return Ok(true);
			}
		};

		if loop_state.feed_id.is_empty() {
			loop_state.feed_id = doc.feed.id.trim().to_string();
			if loop_state.feed_id.is_empty() {
				return Err(ClientError::MissingFeedId {
					url: redact_url(setup_url),
				});
			}
			if !self.claim_feed(&loop_state.feed_id, setup_url) {
				return Ok(false);
			}
		}
		loop_state.endpoints = doc.feed.endpoints.clone();
		self.apply_remote_update(setup_url, setup_url, &doc).await?;
		loop_state.last_revision = doc.revision.trim().to_string();
		loop_state.last_ttl = Some(doc.ttl_seconds);
		Ok(true)
	}

	async fn stream_once(
		&self,
		setup_url: &str,
		loop_state: &mut FeedLoopState,
	) -> (std::result::Result<(), FeedError>, StreamAftermath) {
		let endpoints = loop_state.endpoints.clone();
		let mut applier = StreamApplier {
			daemon: self,
			setup_url,
			loop_state,
			aftermath: StreamAftermath::default(),
		};
		let result = stream_any_endpoints(&self.http, &endpoints, &mut applier).await;
		(result, applier.aftermath)
	}

	async fn poll_loop(
		&self,
		setup_url: &str,
		loop_state: &mut FeedLoopState,
		mut shutdown: watch::Receiver<bool>,
	) -> Result<()> {
		loop {
			if *shutdown.borrow() {
				return Ok(());
			}

			let fetched = tokio::select! {
				res = fetch_any_endpoints(
					&self.http,
					&loop_state.endpoints,
					setup_url,
					loop_state.last_revision.trim(),
				) => res,
				_ = shutdown_signal(&mut shutdown) => return Ok(()),
			};

			match fetched {
				Err(e) if !e.is_retriable() => {
					warn!(
						feed = %redact_url(setup_url),
						error = %e,
						"non-retriable feed error; stopping automatic polling"
					);
					shutdown_signal(&mut shutdown).await;
					return Ok(());
				}
				Err(e) => {
					warn!(feed = %redact_url(setup_url), error = %e, "poll fetch failed");
					self.cache_reconcile_tick(setup_url, loop_state).await;
					sleep_or_shutdown(&mut shutdown, DEFAULT_TICK_ON_FAILURE).await;
				}
				Ok((FetchOutcome::NotModified { .. }, _)) => {
					// Successful sync: no document changes.
					sleep_or_shutdown(&mut shutdown, ttl_tick(loop_state.last_ttl)).await;
				}
				Ok((FetchOutcome::Document(doc), used_endpoint)) => {
					loop_state.last_revision = doc.revision.trim().to_string();
					if loop_state.feed_id.is_empty() {
						loop_state.feed_id = doc.feed.id.trim().to_string();
						if loop_state.feed_id.is_empty() {
							return Err(ClientError::MissingFeedId {
								url: redact_url(setup_url),
							});
						}
						if !self.claim_feed(&loop_state.feed_id, setup_url) {
							return Ok(());
						}
					}
					loop_state.endpoints = doc.feed.endpoints.clone();
					loop_state.last_ttl = Some(doc.ttl_seconds);

					match self.apply_remote_update(&used_endpoint, setup_url, &doc).await {
						Ok(()) => {}
						Err(e) if !e.is_retriable() => {
							warn!(
								feed = %redact_url(setup_url),
								error = %e,
								"non-retriable feed error; stopping automatic polling"
							);
							shutdown_signal(&mut shutdown).await;
							return Ok(());
						}
						Err(e) => {
							warn!(feed = %redact_url(setup_url), error = %e, "reconcile failed");
						}
					}
					sleep_or_shutdown(&mut shutdown, ttl_tick(loop_state.last_ttl)).await;
				}
			}
		}
	}

	/// Claims `feed_id` for `setup_url`. Returns false when another task
	/// already holds it; the loser logs and exits.
	fn claim_feed(&self, feed_id: &str, setup_url: &str) -> bool {
		let mut claimed = self.claimed.lock().expect("claim table lock poisoned");
		if let Some(existing) = claimed.get(feed_id) {
			if existing != setup_url {
				info!(
					feed_id = %feed_id,
					url = %redact_url(setup_url),
					already_claimed_by = %redact_url(existing),
					"duplicate setup url ignored"
				);
			}
			return false;
		}
		claimed.insert(feed_id.to_string(), setup_url.to_string());
		true
	}

	/// Looks up the setup URL's feed id and, when cached encrypted data is
	/// present, decrypts it to recover endpoints. A cached document whose
	/// id differs from the mapping wins and updates it.
	async fn resolve_from_state_cache(&self, setup_url: &str) -> Result<(String, Vec<String>)> {
		let _guard = self.state_lock.lock().await;
		let mut state = State::load(&self.config.state_path).await?;

		let mut feed_id = String::new();
		let mut endpoints = Vec::new();
		let mut op_result: Result<()> = Ok(());

		match state.setup_url_key(setup_url) {
			Err(e) => op_result = Err(e.into()),
			Ok(key) => {
				if let Some(mapped) = state.setup_url_map.get(&key) {
					feed_id = mapped.trim().to_string();
				}
				if !feed_id.is_empty() {
					let cached = state
						.feeds
						.get(&feed_id)
						.map(|fs| fs.cached_encrypted_data.trim().to_string())
						.unwrap_or_default();
					if !cached.is_empty() {
						match decrypt_feed_document_for_setup_url(setup_url, &cached) {
							Err(e) => op_result = Err(e.into()),
							Ok(doc) => {
								endpoints = doc.endpoints.clone();
								let cached_id = doc.id.trim().to_string();
								if !cached_id.is_empty() && cached_id != feed_id {
									state.setup_url_map.insert(key, cached_id.clone());
									feed_id = cached_id;
								}
							}
						}
					}
				}
			}
		}

		// Persist even on failure: the salt (and any mapping fix) must
		// survive.
		state.save_atomic(&self.config.state_path).await?;
		op_result.map(|()| (feed_id, endpoints))
	}

	/// Records metadata and reconciles, under the state lock. State is
	/// persisted even when reconciliation fails so TTL, mapping, and cached
	/// ciphertext survive; `last_reconciled_revision` only advances on
	/// success. Reconciliation is skipped entirely when the revision
	/// already matches.
	async fn apply_remote_update(
		&self,
		request_url: &str,
		setup_url: &str,
		doc: &FetchedDocument,
	) -> Result<()> {
		let feed_id = doc.feed.id.trim().to_string();
		if feed_id.is_empty() {
			return Err(ClientError::MissingFeedId {
				url: redact_url(setup_url),
			});
		}
		if let Some(message) = doc.feed.warning_message.as_deref() {
			let message = message.trim();
			if !message.is_empty() {
				warn!(feed = %redact_url(setup_url), message, "feed warning");
			}
		}

		let _guard = self.state_lock.lock().await;
		let mut state = State::load(&self.config.state_path).await?;

		let mut op_result: Result<()> = Ok(());
		match state.setup_url_key(setup_url) {
			Err(e) => op_result = Err(e.into()),
			Ok(key) => {
				state.setup_url_map.insert(key, feed_id.clone());
				{
					let feed_state = state.feeds.entry(feed_id.clone()).or_default();
					feed_state.ttl_seconds = Some(doc.ttl_seconds);
					feed_state.cached_encrypted_data = doc
						.encrypted_data
						.as_deref()
						.map(str::trim)
						.unwrap_or("")
						.to_string();
				}

				let revision = doc.revision.trim().to_string();
				let already_reconciled = !revision.is_empty()
					&& state
						.feeds
						.get(&feed_id)
						.map(|fs| fs.last_reconciled_revision.trim() == revision)
						.unwrap_or(false);
				if !already_reconciled {
					match apply_feed(self.backend.as_ref(), &mut state, request_url, &doc.feed)
						.await
					{
						Ok(()) => {
							state
								.feeds
								.entry(feed_id)
								.or_default()
								.last_reconciled_revision = revision;
						}
						Err(e) => op_result = Err(e),
					}
				}
			}
		}

		state.save_atomic(&self.config.state_path).await?;
		op_result
	}

	/// Forced reconciliation from the cached encrypted document, used when
	/// the network is unreachable. Throttled by `not_before`.
	async fn maybe_reconcile_from_cache(
		&self,
		setup_url: &str,
		feed_id: &str,
		not_before: Option<Instant>,
	) -> Result<()> {
		if let Some(not_before) = not_before {
			if Instant::now() < not_before {
				return Err(ClientError::CacheThrottled);
			}
		}
		let feed_id = feed_id.trim();
		if feed_id.is_empty() {
			return Err(ClientError::NoCachedConfig);
		}

		let _guard = self.state_lock.lock().await;
		let mut state = State::load(&self.config.state_path).await?;

		let cached = state
			.feeds
			.get(feed_id)
			.map(|fs| fs.cached_encrypted_data.trim().to_string())
			.unwrap_or_default();
		let op_result: Result<()> = if cached.is_empty() {
			Err(ClientError::NoCachedConfig)
		} else {
			match decrypt_feed_document_for_setup_url(setup_url, &cached) {
				Err(e) => Err(e.into()),
				// Offline apply is forced: no revision check, and the
				// reconciled revision does not advance.
				Ok(doc) => apply_feed(self.backend.as_ref(), &mut state, setup_url, &doc).await,
			}
		};

		state.save_atomic(&self.config.state_path).await?;
		op_result
	}

	/// Opportunistic offline reconcile; on success arms the throttle.
	async fn cache_reconcile_tick(&self, setup_url: &str, loop_state: &mut FeedLoopState) {
		let result = self
			.maybe_reconcile_from_cache(
				setup_url,
				&loop_state.feed_id.clone(),
				loop_state.next_cache_reconcile,
			)
			.await;
		if result.is_ok() {
			loop_state.next_cache_reconcile = Some(Instant::now() + DEFAULT_RECONCILE_TICK);
		}
	}
}

/// Everything the stream handler needs to report back to the loop.
#[derive(Default)]
struct StreamAftermath {
	claim_lost: bool,
	failure: Option<ClientError>,
}

struct StreamApplier<'a> {
	daemon: &'a Daemon,
	setup_url: &'a str,
	loop_state: &'a mut FeedLoopState,
	aftermath: StreamAftermath,
}

#[async_trait]
impl StreamHandler for StreamApplier<'_> {
	async fn on_event(
		&mut self,
		endpoint: &str,
		payload: &str,
	) -> std::result::Result<(), FeedError> {
		let doc = match decode_success_payload(self.setup_url, payload.as_bytes()) {
			Ok(doc) => doc,
			Err(e) if !e.is_retriable() => return Err(e),
			Err(e) => {
				warn!(feed = %redact_url(endpoint), error = %e, "stream event invalid");
				return Ok(());
			}
		};

		self.loop_state.last_ttl = Some(doc.ttl_seconds);
		self.loop_state.last_revision = doc.revision.trim().to_string();
		if self.loop_state.feed_id.is_empty() {
			self.loop_state.feed_id = doc.feed.id.trim().to_string();
			if self.loop_state.feed_id.is_empty() {
				return Err(FeedError::Other("missing feed id".to_string()));
			}
			if !self.daemon.claim_feed(&self.loop_state.feed_id, self.setup_url) {
				self.aftermath.claim_lost = true;
				return Err(FeedError::Other("feed claimed by another task".to_string()));
			}
		}
		self.loop_state.endpoints = doc.feed.endpoints.clone();

		match self.daemon.apply_remote_update(endpoint, self.setup_url, &doc).await {
			Ok(()) => Ok(()),
			Err(e) => {
				let message = e.to_string();
				self.aftermath.failure = Some(e);
				Err(FeedError::Other(message))
			}
		}
	}
}

fn ttl_tick(last_ttl: Option<i64>) -> Duration {
	let mut tick = DEFAULT_TICK_ON_FAILURE;
	if let Some(ttl) = last_ttl {
		if ttl > 0 {
			tick = Duration::from_secs(ttl as u64);
		}
	}
	tick.max(MIN_TICK)
}

/// Resolves when shutdown is requested (or the sender is gone).
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
	loop {
		if *shutdown.borrow() {
			return;
		}
		if shutdown.changed().await.is_err() {
			return;
		}
	}
}

async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
	tokio::select! {
		_ = tokio::time::sleep(duration) => {}
		_ = shutdown_signal(shutdown) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reconcile::testing::MockBackend;
	use age::armor::{ArmoredWriter, Format};
	use age::secrecy::ExposeSecret;
	use age::x25519::Identity;
	use std::io::Write;
	use tempfile::TempDir;
	use wgfeed_backend::BackendKind;
	use wgfeed_model::{DisplayInfo, FeedDocument, Tunnel};

	const FEED_ID: &str = "11111111-1111-4111-8111-111111111111";
	const SETUP_URL: &str = "https://feeds.example.com/x";

	fn daemon_with(dir: &TempDir) -> (Arc<MockBackend>, Daemon) {
		let backend = Arc::new(MockBackend::default());
		let config = ClientConfig {
			backend: BackendKind::WgQuick,
			state_path: dir.path().join("state.json"),
			setup_urls: vec![SETUP_URL.to_string()],
		};
		let daemon = Daemon::new(config, Arc::clone(&backend) as Arc<dyn Backend>);
		(backend, daemon)
	}

	fn document() -> FeedDocument {
		FeedDocument {
			id: FEED_ID.to_string(),
			endpoints: vec!["https://feeds.example.com/x".to_string()],
			warning_message: None,
			display_info: DisplayInfo {
				title: "x".to_string(),
				description: None,
				icon_url: None,
			},
			tunnels: vec![Tunnel {
				id: "t1".to_string(),
				name: "home".to_string(),
				display_info: DisplayInfo {
					title: "H".to_string(),
					description: None,
					icon_url: None,
				},
				enabled: true,
				forced: true,
				wg_quick_config: "[Interface]\nPrivateKey = x\n".to_string(),
			}],
		}
	}

	fn fetched(revision: &str, encrypted_data: Option<String>) -> FetchedDocument {
		FetchedDocument {
			revision: revision.to_string(),
			ttl_seconds: 60,
			supports_sse: false,
			encrypted_data,
			feed: document(),
		}
	}

	fn encrypt_armored(identity: &Identity, plaintext: &[u8]) -> String {
		let encryptor =
			age::Encryptor::with_recipients(vec![Box::new(identity.to_public())])
				.expect("non-empty recipients");
		let mut out = Vec::new();
		let armored = ArmoredWriter::wrap_output(&mut out, Format::AsciiArmor).unwrap();
		let mut writer = encryptor.wrap_output(armored).unwrap();
		writer.write_all(plaintext).unwrap();
		writer.finish().and_then(|armored| armored.finish()).unwrap();
		String::from_utf8(out).unwrap()
	}

	fn fragment_for(identity: &Identity) -> String {
		identity
			.to_string()
			.expose_secret()
			.strip_prefix("AGE-SECRET-KEY-")
			.unwrap()
			.to_lowercase()
	}

	#[tokio::test]
	async fn test_apply_remote_update_skips_unchanged_revision() {
		let dir = TempDir::new().unwrap();
		let (backend, daemon) = daemon_with(&dir);

		let doc = fetched("rev-1", None);
		daemon.apply_remote_update(SETUP_URL, SETUP_URL, &doc).await.unwrap();
		assert_eq!(backend.applies().len(), 1);

		// Same revision again: no further Apply.
		daemon.apply_remote_update(SETUP_URL, SETUP_URL, &doc).await.unwrap();
		assert_eq!(backend.applies().len(), 1);

		// New revision reconciles again.
		let doc = fetched("rev-2", None);
		daemon.apply_remote_update(SETUP_URL, SETUP_URL, &doc).await.unwrap();
		assert_eq!(backend.applies().len(), 2);

		let state = State::load(&daemon.config.state_path).await.unwrap();
		assert_eq!(state.feeds[FEED_ID].last_reconciled_revision, "rev-2");
	}

	#[tokio::test]
	async fn test_apply_remote_update_caches_ciphertext() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);

		let doc = fetched("rev-1", Some("ARMORED".to_string()));
		daemon.apply_remote_update(SETUP_URL, SETUP_URL, &doc).await.unwrap();

		let state = State::load(&daemon.config.state_path).await.unwrap();
		assert_eq!(state.feeds[FEED_ID].cached_encrypted_data, "ARMORED");
		assert_eq!(state.feeds[FEED_ID].ttl_seconds, Some(60));

		// A later plaintext response clears the cache.
		let doc = fetched("rev-2", None);
		daemon.apply_remote_update(SETUP_URL, SETUP_URL, &doc).await.unwrap();
		let state = State::load(&daemon.config.state_path).await.unwrap();
		assert!(state.feeds[FEED_ID].cached_encrypted_data.is_empty());
	}

	#[tokio::test]
	async fn test_apply_remote_update_keeps_metadata_on_apply_failure() {
		let dir = TempDir::new().unwrap();
		let (backend, daemon) = daemon_with(&dir);
		*backend.fail_apply_for.lock().unwrap() = Some("home".to_string());

		let doc = fetched("rev-1", None);
		let err = daemon
			.apply_remote_update(SETUP_URL, SETUP_URL, &doc)
			.await
			.unwrap_err();
		assert!(err.is_retriable());

		// Metadata persisted; the revision did not advance.
		let state = State::load(&daemon.config.state_path).await.unwrap();
		assert_eq!(state.feeds[FEED_ID].ttl_seconds, Some(60));
		assert!(state.feeds[FEED_ID].last_reconciled_revision.is_empty());
	}

	#[tokio::test]
	async fn test_claim_feed_dedupes() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);

		assert!(daemon.claim_feed(FEED_ID, "https://a/#k1"));
		// Same URL re-claiming is still a refusal (the id is held).
		assert!(!daemon.claim_feed(FEED_ID, "https://a/#k1"));
		assert!(!daemon.claim_feed(FEED_ID, "https://b/#k2"));
		assert!(daemon.claim_feed("22222222-2222-4222-8222-222222222222", "https://b/#k2"));
	}

	#[tokio::test]
	async fn test_maybe_reconcile_from_cache_is_forced() {
		let dir = TempDir::new().unwrap();
		let (backend, daemon) = daemon_with(&dir);

		let identity = Identity::generate();
		let setup_url = format!("https://feeds.example.com/x#{}", fragment_for(&identity));
		let ciphertext =
			encrypt_armored(&identity, &serde_json::to_vec(&document()).unwrap());

		// Seed state as if an encrypted response was reconciled earlier.
		let doc = fetched("rev-1", Some(ciphertext));
		daemon.apply_remote_update(&setup_url, &setup_url, &doc).await.unwrap();
		assert_eq!(backend.applies().len(), 1);

		// Offline reconcile re-applies even though the revision matches.
		daemon
			.maybe_reconcile_from_cache(&setup_url, FEED_ID, None)
			.await
			.unwrap();
		assert_eq!(backend.applies().len(), 2);

		let state = State::load(&daemon.config.state_path).await.unwrap();
		assert_eq!(state.feeds[FEED_ID].last_reconciled_revision, "rev-1");
	}

	#[tokio::test]
	async fn test_maybe_reconcile_from_cache_throttles() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);

		let err = daemon
			.maybe_reconcile_from_cache(
				SETUP_URL,
				FEED_ID,
				Some(Instant::now() + Duration::from_secs(60)),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, ClientError::CacheThrottled));
	}

	#[tokio::test]
	async fn test_maybe_reconcile_from_cache_requires_cache() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);

		let err = daemon
			.maybe_reconcile_from_cache(SETUP_URL, FEED_ID, None)
			.await
			.unwrap_err();
		assert!(matches!(err, ClientError::NoCachedConfig));

		let err = daemon
			.maybe_reconcile_from_cache(SETUP_URL, "", None)
			.await
			.unwrap_err();
		assert!(matches!(err, ClientError::NoCachedConfig));
	}

	#[tokio::test]
	async fn test_resolve_from_state_cache_prefers_cached_document_id() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);

		let identity = Identity::generate();
		let setup_url = format!("https://feeds.example.com/x#{}", fragment_for(&identity));
		let ciphertext =
			encrypt_armored(&identity, &serde_json::to_vec(&document()).unwrap());

		// Map the setup URL to a stale feed id whose cache holds the real
		// document.
		{
			let mut state = State::load(&daemon.config.state_path).await.unwrap();
			let key = state.setup_url_key(&setup_url).unwrap();
			let stale_id = "99999999-9999-4999-8999-999999999999".to_string();
			state.setup_url_map.insert(key, stale_id.clone());
			state.feeds.entry(stale_id).or_default().cached_encrypted_data = ciphertext;
			state.save_atomic(&daemon.config.state_path).await.unwrap();
		}

		let (feed_id, endpoints) = daemon.resolve_from_state_cache(&setup_url).await.unwrap();
		assert_eq!(feed_id, FEED_ID);
		assert_eq!(endpoints, vec!["https://feeds.example.com/x".to_string()]);

		let state = State::load(&daemon.config.state_path).await.unwrap();
		let mapped: Vec<&String> = state.setup_url_map.values().collect();
		assert_eq!(mapped, vec![&FEED_ID.to_string()]);
	}

	#[tokio::test]
	async fn test_resolve_from_state_cache_empty_state() {
		let dir = TempDir::new().unwrap();
		let (_backend, daemon) = daemon_with(&dir);
		let (feed_id, endpoints) = daemon.resolve_from_state_cache(SETUP_URL).await.unwrap();
		assert!(feed_id.is_empty());
		assert!(endpoints.is_empty());
	}

	#[test]
	fn test_ttl_tick_bounds() {
		assert_eq!(ttl_tick(None), Duration::from_secs(60));
		assert_eq!(ttl_tick(Some(0)), Duration::from_secs(60));
		assert_eq!(ttl_tick(Some(2)), Duration::from_secs(5));
		assert_eq!(ttl_tick(Some(120)), Duration::from_secs(120));
	}
}
