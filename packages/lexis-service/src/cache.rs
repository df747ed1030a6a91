//! Two-tier answer cache with at most one computation in flight per key.
//!
//! L1 is a process-local moka cache. L2 is an optional shared [`CacheBackend`]; every L2 failure
//! is logged and treated as a miss. Each L2 answer entry is also listed under a per-document
//! index key so one document can be purged without scanning the keyspace.

use std::{
	collections::{BTreeSet, HashMap},
	future::Future,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use moka::sync::Cache;
use tokio::sync::watch;

use crate::{Error, Result};
use lexis_domain::{CacheBackend, RankedAnswer, cache_key_prefix};

type Flight = Option<Result<Arc<RankedAnswer>>>;

/// How a lookup was satisfied.
#[derive(Debug, Clone)]
pub enum Lookup {
	/// Served from L1 or L2.
	Hit(Arc<RankedAnswer>),
	/// Computed by this caller.
	Computed(Arc<RankedAnswer>),
	/// Computed by a concurrent caller with the same key.
	Joined(Arc<RankedAnswer>),
}
impl Lookup {
	pub fn answer(&self) -> &Arc<RankedAnswer> {
		match self {
			Self::Hit(answer) | Self::Computed(answer) | Self::Joined(answer) => answer,
		}
	}

	pub fn is_hit(&self) -> bool {
		matches!(self, Self::Hit(_))
	}
}

/// Output of a cache-miss computation.
#[derive(Debug, Clone)]
pub struct Computed {
	pub answer: RankedAnswer,
	/// False for answers that should be recomputed next time, e.g. when every search failed.
	pub cacheable: bool,
}

/// Counts from one invalidation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidated {
	pub l2_entries: u64,
}

pub struct CacheStore {
	enabled: bool,
	prefix: String,
	l1: Cache<String, Arc<RankedAnswer>>,
	l2: Option<Arc<dyn CacheBackend>>,
	l2_ttl: Duration,
	generation: AtomicU64,
	in_flight: Mutex<HashMap<String, watch::Receiver<Flight>>>,
}
impl CacheStore {
	pub fn new(cfg: &lexis_config::Cache, l2: Option<Arc<dyn CacheBackend>>) -> Self {
		let l1 = Cache::builder()
			.max_capacity(cfg.l1_max_entries)
			.time_to_live(Duration::from_secs(cfg.l1_ttl_secs))
			.support_invalidation_closures()
			.build();

		Self {
			enabled: cfg.enabled,
			prefix: cfg.key_prefix.clone(),
			l1,
			l2,
			l2_ttl: Duration::from_secs(cfg.l2_ttl_secs),
			generation: AtomicU64::new(0),
			in_flight: Mutex::new(HashMap::new()),
		}
	}

	/// Storage key for a query hash from [`lexis_domain::cache_key`].
	pub fn answer_key(&self, hash: &str) -> String {
		format!("{}:answer:{hash}", self.prefix)
	}

	fn document_key(&self, doc_id: &str) -> String {
		format!("{}:doc:{doc_id}", self.prefix)
	}

	/// Bumped by every invalidation.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::SeqCst)
	}

	/// Number of L1 entries, after pending maintenance.
	pub fn l1_len(&self) -> u64 {
		self.l1.run_pending_tasks();

		self.l1.entry_count()
	}

	pub async fn get(&self, key: &str) -> Option<Arc<RankedAnswer>> {
		if !self.enabled {
			return None;
		}
		if let Some(answer) = self.l1.get(key) {
			return Some(answer);
		}

		let l2 = self.l2.as_ref()?;
		let bytes = match l2.get(key).await {
			Ok(Some(bytes)) => bytes,
			Ok(None) => return None,
			Err(err) => {
				tracing::warn!(
					cache_key_prefix = short(key),
					error = %err,
					"Shared cache read failed. Treating as miss."
				);

				return None;
			},
		};
		let answer = match serde_json::from_slice::<RankedAnswer>(&bytes) {
			Ok(answer) => Arc::new(answer),
			Err(err) => {
				tracing::warn!(
					cache_key_prefix = short(key),
					error = %err,
					"Shared cache payload is invalid. Treating as miss."
				);

				return None;
			},
		};

		self.l1.insert(key.to_string(), answer.clone());

		Some(answer)
	}

	pub async fn put(&self, key: &str, answer: Arc<RankedAnswer>) {
		if !self.enabled {
			return;
		}

		self.l1.insert(key.to_string(), answer.clone());

		let Some(l2) = self.l2.as_ref() else {
			return;
		};
		let payload = match serde_json::to_vec(answer.as_ref()) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::warn!(
					cache_key_prefix = short(key),
					error = %err,
					"Failed to encode answer for the shared cache."
				);

				return;
			},
		};

		if let Err(err) = l2.set(key, &payload, self.l2_ttl).await {
			tracing::warn!(
				cache_key_prefix = short(key),
				error = %err,
				"Shared cache write failed. Continuing with the local tier only."
			);

			return;
		}

		for doc_id in answer.document_ids() {
			if let Err(err) = self.index_document(l2.as_ref(), &doc_id, key).await {
				tracing::warn!(
					cache_key_prefix = short(key),
					doc_id = %doc_id,
					error = %err,
					"Failed to record the answer under its document."
				);
			}
		}
	}

	async fn index_document(
		&self,
		l2: &dyn CacheBackend,
		doc_id: &str,
		key: &str,
	) -> std::result::Result<(), lexis_domain::CacheUnavailable> {
		let doc_key = self.document_key(doc_id);
		let mut keys = match l2.get(&doc_key).await? {
			Some(bytes) => decode_document_index(doc_id, &bytes),
			None => BTreeSet::new(),
		};

		if !keys.insert(key.to_string()) {
			return Ok(());
		}

		let payload = serde_json::to_vec(&keys).map_err(|err| {
			lexis_domain::CacheUnavailable::new(format!("Failed to encode document index: {err}."))
		})?;

		l2.set(&doc_key, &payload, self.l2_ttl).await
	}

	/// Returns the cached answer for `key`, or runs `compute` once across all concurrent callers.
	///
	/// Concurrent callers wait for the running computation and receive its result, error
	/// included. If the computing caller is cancelled, a waiter takes over. A result is not
	/// cached when an invalidation happened while it was being computed.
	pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Lookup>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Computed>>,
	{
		let tx = loop {
			if let Some(answer) = self.get(key).await {
				return Ok(Lookup::Hit(answer));
			}

			let role = {
				let mut in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());

				// A leader may have finished between the lookup above and taking the lock.
				if let Some(answer) = self.enabled.then(|| self.l1.get(key)).flatten() {
					return Ok(Lookup::Hit(answer));
				}

				match in_flight.get(key) {
					Some(rx) => Role::Follower(rx.clone()),
					None => {
						let (tx, rx) = watch::channel(None);

						in_flight.insert(key.to_string(), rx);

						Role::Leader(tx)
					},
				}
			};

			match role {
				Role::Leader(tx) => break tx,
				Role::Follower(mut rx) => {
					let shared = rx.wait_for(Option::is_some).await.map(|flight| (*flight).clone());

					match shared {
						Ok(Some(Ok(answer))) => return Ok(Lookup::Joined(answer)),
						Ok(Some(Err(err))) => return Err(err),
						// The leader was dropped without a result. Retry, possibly as leader.
						_ => continue,
					}
				},
			}
		};
		let _guard = FlightGuard { store: self, key };
		let started_at = self.generation();
		let result =
			compute().await.map(|computed| (Arc::new(computed.answer), computed.cacheable));

		if let Ok((answer, true)) = &result {
			if self.generation() == started_at {
				self.put(key, answer.clone()).await;
			} else {
				tracing::debug!(
					cache_key_prefix = short(key),
					"Skipping cache write after a concurrent invalidation."
				);
			}
		}

		let result = result.map(|(answer, _)| answer);
		let _ = tx.send(Some(result.clone()));

		result.map(Lookup::Computed)
	}

	/// Drops every cached answer that cites `doc_id`.
	pub async fn invalidate_document(&self, doc_id: &str) -> Invalidated {
		self.generation.fetch_add(1, Ordering::SeqCst);

		let target = doc_id.to_string();

		if let Err(err) =
			self.l1.invalidate_entries_if(move |_, answer| answer.references_document(&target))
		{
			tracing::warn!(doc_id, error = %err, "Local cache invalidation was rejected.");
		}

		let Some(l2) = self.l2.as_ref() else {
			return Invalidated::default();
		};
		let doc_key = self.document_key(doc_id);
		let keys = match l2.get(&doc_key).await {
			Ok(Some(bytes)) => decode_document_index(doc_id, &bytes),
			Ok(None) => BTreeSet::new(),
			Err(err) => {
				tracing::warn!(
					doc_id,
					error = %err,
					"Shared cache unavailable during invalidation."
				);

				return Invalidated::default();
			},
		};
		let mut removed = 0;

		for key in keys.iter().chain(std::iter::once(&doc_key)) {
			match l2.delete(key).await {
				Ok(count) => removed += count,
				Err(err) => {
					tracing::warn!(
						doc_id,
						cache_key_prefix = short(key),
						error = %err,
						"Failed to delete shared cache entry."
					);
				},
			}
		}

		tracing::info!(doc_id, l2_entries = removed, "Invalidated cached answers for document.");

		Invalidated { l2_entries: removed }
	}

	/// Drops every cached answer under this store's prefix.
	pub async fn clear(&self) -> Invalidated {
		self.generation.fetch_add(1, Ordering::SeqCst);
		self.l1.invalidate_all();

		let Some(l2) = self.l2.as_ref() else {
			return Invalidated::default();
		};
		let pattern = format!("{}:*", self.prefix);

		match l2.delete(&pattern).await {
			Ok(removed) => {
				tracing::info!(l2_entries = removed, "Cleared retrieval cache.");

				Invalidated { l2_entries: removed }
			},
			Err(err) => {
				tracing::warn!(error = %err, "Shared cache unavailable while clearing.");

				Invalidated::default()
			},
		}
	}
}

enum Role {
	Leader(watch::Sender<Flight>),
	Follower(watch::Receiver<Flight>),
}

// Removes the in-flight entry when the leader finishes or is dropped mid-computation.
struct FlightGuard<'a> {
	store: &'a CacheStore,
	key: &'a str,
}
impl Drop for FlightGuard<'_> {
	fn drop(&mut self) {
		self.store.in_flight.lock().unwrap_or_else(|err| err.into_inner()).remove(self.key);
	}
}

// A corrupt index loses the answer keys it listed. Those answers then age out through the L2 TTL.
fn decode_document_index(doc_id: &str, bytes: &[u8]) -> BTreeSet<String> {
	serde_json::from_slice(bytes).unwrap_or_else(|err| {
		tracing::warn!(
			doc_id,
			error = %err,
			"Document index payload is invalid. Answers it listed are no longer reachable."
		);

		BTreeSet::new()
	})
}

fn short(key: &str) -> &str {
	let hash = key.rsplit(':').next().unwrap_or(key);

	cache_key_prefix(hash)
}
