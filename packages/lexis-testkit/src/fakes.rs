//! In-memory stand-ins for the retrieval collaborators.
//!
//! The embedder and index share [`embed_text`], a hashed bag-of-words projection, so search
//! results follow token overlap between the query variant and the chunk text.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Mutex, MutexGuard,
		atomic::{AtomicUsize, Ordering},
	},
	time::{Duration, Instant},
};

use serde_json::Value;
use time::Date;

use lexis_domain::{
	BoxFuture, CacheBackend, CacheUnavailable, ChunkLookup, ChunkRecord, CrossEncoder, DOC_ID_KEY,
	DOC_TYPE_KEY, Embedder, Metadata, ProviderError, ProviderResult, SECTION_TITLE_KEY,
	SearchFilter, SearchHit, TEXT_KEY, TextGenerator, VectorIndex,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
	text.split(|ch: char| !ch.is_alphanumeric())
		.filter(|token| !token.is_empty())
		.map(str::to_lowercase)
}

/// Deterministic unit vector built from hashed lowercase tokens.
pub fn embed_text(text: &str, dimensions: usize) -> Vec<f32> {
	let mut vector = vec![0.0_f32; dimensions.max(1)];

	for token in tokens(text) {
		let hash = blake3::hash(token.as_bytes());
		let mut bytes = [0_u8; 8];

		bytes.copy_from_slice(&hash.as_bytes()[..8]);

		let slot = (u64::from_le_bytes(bytes) % vector.len() as u64) as usize;

		vector[slot] += 1.0;
	}

	let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vector {
			*value /= norm;
		}
	}

	vector
}

/// Injected latency and failures shared by every fake.
///
/// Rules keyed by a substring apply when the call's input contains it. Queued failures are consumed
/// one per call before the standing rules are checked.
#[derive(Default)]
pub struct Faults {
	calls: AtomicUsize,
	delay: Mutex<Duration>,
	delay_when: Mutex<Vec<(String, Duration)>>,
	queued: Mutex<VecDeque<ProviderError>>,
	fail_when: Mutex<Vec<(String, ProviderError)>>,
	always: Mutex<Option<ProviderError>>,
	inputs: Mutex<Vec<String>>,
}
impl Faults {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// Inputs seen so far, in call order.
	pub fn inputs(&self) -> Vec<String> {
		lock(&self.inputs).clone()
	}

	pub fn set_delay(&self, delay: Duration) {
		*lock(&self.delay) = delay;
	}

	pub fn delay_when(&self, needle: impl Into<String>, delay: Duration) {
		lock(&self.delay_when).push((needle.into(), delay));
	}

	pub fn fail_next(&self, err: ProviderError) {
		lock(&self.queued).push_back(err);
	}

	pub fn fail_when(&self, needle: impl Into<String>, err: ProviderError) {
		lock(&self.fail_when).push((needle.into(), err));
	}

	pub fn fail_always(&self, err: ProviderError) {
		*lock(&self.always) = Some(err);
	}

	pub fn reset(&self) {
		*lock(&self.delay) = Duration::ZERO;
		lock(&self.delay_when).clear();
		lock(&self.queued).clear();
		lock(&self.fail_when).clear();
		*lock(&self.always) = None;
	}

	async fn enter(&self, input: &str) -> ProviderResult<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		lock(&self.inputs).push(input.to_string());

		let delay = lock(&self.delay_when)
			.iter()
			.filter(|(needle, _)| input.contains(needle.as_str()))
			.map(|(_, delay)| *delay)
			.max()
			.unwrap_or_else(|| *lock(&self.delay));

		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		if let Some(err) = lock(&self.queued).pop_front() {
			return Err(err);
		}
		if let Some((_, err)) =
			lock(&self.fail_when).iter().find(|(needle, _)| input.contains(needle.as_str()))
		{
			return Err(err.clone());
		}
		if let Some(err) = lock(&self.always).clone() {
			return Err(err);
		}

		Ok(())
	}
}

/// Returns scripted completions, then numbered `alternative phrasing N` strings.
#[derive(Default)]
pub struct FakeGenerator {
	pub faults: Faults,
	responses: Mutex<VecDeque<String>>,
	issued: AtomicUsize,
	prompts: Mutex<Vec<(String, u32, Duration)>>,
}
impl FakeGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_responses<I, S>(responses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let generator = Self::default();

		lock(&generator.responses).extend(responses.into_iter().map(Into::into));

		generator
	}

	/// `(prompt, max_tokens, timeout)` per call.
	pub fn prompts(&self) -> Vec<(String, u32, Duration)> {
		lock(&self.prompts).clone()
	}
}
impl TextGenerator for FakeGenerator {
	fn generate<'a>(
		&'a self,
		prompt: &'a str,
		max_tokens: u32,
		timeout: Duration,
	) -> BoxFuture<'a, ProviderResult<String>> {
		Box::pin(async move {
			lock(&self.prompts).push((prompt.to_string(), max_tokens, timeout));
			self.faults.enter(prompt).await?;

			if let Some(response) = lock(&self.responses).pop_front() {
				return Ok(response);
			}

			let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

			Ok(format!("alternative phrasing {n}"))
		})
	}
}

pub struct FakeEmbedder {
	pub faults: Faults,
	dimensions: usize,
}
impl FakeEmbedder {
	pub fn new(dimensions: usize) -> Self {
		Self { faults: Faults::default(), dimensions }
	}
}
impl Embedder for FakeEmbedder {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<Vec<f32>>> {
		Box::pin(async move {
			self.faults.enter(text).await?;

			Ok(embed_text(text, self.dimensions))
		})
	}
}

/// A chunk stored in [`FakeIndex`].
#[derive(Debug, Clone)]
pub struct FakeChunk {
	pub chunk_id: String,
	pub doc_id: String,
	pub text: String,
	pub doc_type: Option<String>,
	pub category: Option<String>,
	pub status: String,
	pub issue_date: Option<Date>,
	/// When false the text is only reachable through [`ChunkLookup`].
	pub inline_text: bool,
}
impl FakeChunk {
	pub fn new(chunk_id: &str, doc_id: &str, text: &str) -> Self {
		Self {
			chunk_id: chunk_id.to_string(),
			doc_id: doc_id.to_string(),
			text: text.to_string(),
			doc_type: None,
			category: None,
			status: "active".to_string(),
			issue_date: None,
			inline_text: true,
		}
	}

	pub fn doc_type(mut self, doc_type: &str) -> Self {
		self.doc_type = Some(doc_type.to_string());

		self
	}

	pub fn category(mut self, category: &str) -> Self {
		self.category = Some(category.to_string());

		self
	}

	pub fn status(mut self, status: &str) -> Self {
		self.status = status.to_string();

		self
	}

	pub fn issued(mut self, date: Date) -> Self {
		self.issue_date = Some(date);

		self
	}

	pub fn without_inline_text(mut self) -> Self {
		self.inline_text = false;

		self
	}

	fn matches(&self, filter: &SearchFilter) -> bool {
		if self.status != filter.status() {
			return false;
		}
		if !filter.doc_types().is_empty()
			&& !self.doc_type.as_ref().is_some_and(|v| filter.doc_types().contains(v))
		{
			return false;
		}
		if !filter.categories().is_empty()
			&& !self.category.as_ref().is_some_and(|v| filter.categories().contains(v))
		{
			return false;
		}
		if filter.date_from().is_some() || filter.date_to().is_some() {
			let Some(issued) = self.issue_date else {
				return false;
			};

			if filter.date_from().is_some_and(|from| issued < from)
				|| filter.date_to().is_some_and(|to| issued > to)
			{
				return false;
			}
		}

		true
	}

	fn metadata(&self) -> Metadata {
		let mut metadata = Metadata::new();

		metadata.insert(DOC_ID_KEY.to_string(), Value::String(self.doc_id.clone()));
		metadata.insert("status".to_string(), Value::String(self.status.clone()));

		if let Some(doc_type) = &self.doc_type {
			metadata.insert(DOC_TYPE_KEY.to_string(), Value::String(doc_type.clone()));
		}
		if let Some(category) = &self.category {
			metadata.insert("category".to_string(), Value::String(category.clone()));
		}
		if self.inline_text {
			metadata.insert(TEXT_KEY.to_string(), Value::String(self.text.clone()));
		}

		metadata
	}
}

/// Brute-force cosine index that honors [`SearchFilter`] like the real collection does.
pub struct FakeIndex {
	pub faults: Faults,
	pub lookup_faults: Faults,
	dimensions: usize,
	chunks: Mutex<Vec<FakeChunk>>,
	filters: Mutex<Vec<(SearchFilter, u32)>>,
}
impl FakeIndex {
	pub fn new(dimensions: usize) -> Self {
		Self {
			faults: Faults::default(),
			lookup_faults: Faults::default(),
			dimensions,
			chunks: Mutex::new(Vec::new()),
			filters: Mutex::new(Vec::new()),
		}
	}

	pub fn with_chunks(dimensions: usize, chunks: impl IntoIterator<Item = FakeChunk>) -> Self {
		let index = Self::new(dimensions);

		lock(&index.chunks).extend(chunks);

		index
	}

	pub fn insert(&self, chunk: FakeChunk) {
		let mut chunks = lock(&self.chunks);

		chunks.retain(|existing| existing.chunk_id != chunk.chunk_id);
		chunks.push(chunk);
	}

	pub fn remove_document(&self, doc_id: &str) {
		lock(&self.chunks).retain(|chunk| chunk.doc_id != doc_id);
	}

	/// Filters and `top_k` received by `search`, in call order.
	pub fn received(&self) -> Vec<(SearchFilter, u32)> {
		lock(&self.filters).clone()
	}
}
impl VectorIndex for FakeIndex {
	fn search<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
		filter: &'a SearchFilter,
	) -> BoxFuture<'a, ProviderResult<Vec<SearchHit>>> {
		Box::pin(async move {
			lock(&self.filters).push((filter.clone(), top_k));
			self.faults.enter(&format!("{vector:?}")).await?;

			if vector.len() != self.dimensions {
				return Err(ProviderError::permanent("fake-index", "Vector dimension mismatch."));
			}

			let mut scored: Vec<(f32, FakeChunk)> = lock(&self.chunks)
				.iter()
				.filter(|chunk| chunk.matches(filter))
				.map(|chunk| {
					let chunk_vec = embed_text(&chunk.text, self.dimensions);
					let score = vector.iter().zip(&chunk_vec).map(|(a, b)| a * b).sum::<f32>();

					(score, chunk.clone())
				})
				.collect();

			scored.sort_by(|a, b| {
				b.0.total_cmp(&a.0).then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
			});
			scored.truncate(top_k as usize);

			Ok(scored
				.into_iter()
				.map(|(score, chunk)| SearchHit {
					chunk_id: chunk.chunk_id.clone(),
					score,
					metadata: chunk.metadata(),
				})
				.collect())
		})
	}
}
impl ChunkLookup for FakeIndex {
	fn get<'a>(&'a self, chunk_id: &'a str) -> BoxFuture<'a, ProviderResult<ChunkRecord>> {
		Box::pin(async move {
			self.lookup_faults.enter(chunk_id).await?;

			lock(&self.chunks)
				.iter()
				.find(|chunk| chunk.chunk_id == chunk_id)
				.map(|chunk| ChunkRecord {
					text: chunk.text.clone(),
					doc_id: chunk.doc_id.clone(),
					section_title: None,
					doc_type: chunk.doc_type.clone(),
				})
				.ok_or_else(|| {
					ProviderError::permanent("fake-index", format!("Chunk {chunk_id} not found."))
				})
		})
	}
}

/// Scores each text by the share of query tokens it contains.
#[derive(Default)]
pub struct FakeCrossEncoder {
	pub faults: Faults,
	batches: Mutex<Vec<Vec<String>>>,
}
impl FakeCrossEncoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn batches(&self) -> Vec<Vec<String>> {
		lock(&self.batches).clone()
	}
}
impl CrossEncoder for FakeCrossEncoder {
	fn score<'a>(
		&'a self,
		query: &'a str,
		chunk_texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<f32>>> {
		Box::pin(async move {
			lock(&self.batches).push(chunk_texts.to_vec());
			self.faults.enter(query).await?;

			let query_tokens: Vec<String> = tokens(query).collect();

			Ok(chunk_texts
				.iter()
				.map(|text| {
					if query_tokens.is_empty() {
						return 0.0;
					}

					let text_tokens: Vec<String> = tokens(text).collect();
					let hits = query_tokens.iter().filter(|t| text_tokens.contains(t)).count();

					hits as f32 / query_tokens.len() as f32
				})
				.collect())
		})
	}
}

/// Shared-tier stand-in with TTL and an outage switch.
#[derive(Default)]
pub struct MemoryCacheBackend {
	entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
	unavailable: Mutex<bool>,
	pub gets: AtomicUsize,
	pub sets: AtomicUsize,
	pub deletes: AtomicUsize,
}
impl MemoryCacheBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		*lock(&self.unavailable) = unavailable;
	}

	pub fn keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();

		keys.sort();

		keys
	}

	pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
		lock(&self.entries).get(key).map(|(bytes, _)| bytes.clone())
	}

	fn check(&self) -> Result<(), CacheUnavailable> {
		if *lock(&self.unavailable) {
			return Err(CacheUnavailable::new("Memory cache backend is switched off."));
		}

		Ok(())
	}
}
impl CacheBackend for MemoryCacheBackend {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheUnavailable>> {
		Box::pin(async move {
			self.gets.fetch_add(1, Ordering::SeqCst);
			self.check()?;

			let mut entries = lock(&self.entries);
			let expired = entries.get(key).is_some_and(|(_, expires)| *expires <= Instant::now());

			if expired {
				entries.remove(key);

				return Ok(None);
			}

			Ok(entries.get(key).map(|(bytes, _)| bytes.clone()))
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a [u8],
		ttl: Duration,
	) -> BoxFuture<'a, Result<(), CacheUnavailable>> {
		Box::pin(async move {
			self.sets.fetch_add(1, Ordering::SeqCst);
			self.check()?;
			lock(&self.entries).insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));

			Ok(())
		})
	}

	fn delete<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64, CacheUnavailable>> {
		Box::pin(async move {
			self.deletes.fetch_add(1, Ordering::SeqCst);
			self.check()?;

			let mut entries = lock(&self.entries);
			let before = entries.len();

			match pattern.strip_suffix('*') {
				Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
				None => {
					entries.remove(pattern);
				},
			}

			Ok((before - entries.len()) as u64)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn embeddings_are_unit_length_and_deterministic() {
		let a = embed_text("Open bidding conditions", 16);
		let b = embed_text("open   BIDDING conditions", 16);
		let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();

		assert_eq!(a, b);
		assert!((norm - 1.0).abs() < 1e-5);
	}

	#[tokio::test]
	async fn index_applies_status_and_doc_type() {
		let index = FakeIndex::with_chunks(
			16,
			[
				FakeChunk::new("c1", "d1", "open bidding").doc_type("law"),
				FakeChunk::new("c2", "d2", "open bidding").doc_type("law").status("archived"),
				FakeChunk::new("c3", "d3", "open bidding").doc_type("circular"),
			],
		);
		let filters = lexis_domain::Filters {
			doc_types: ["law".to_string()].into_iter().collect(),
			..Default::default()
		};
		let hits = index
			.search(&embed_text("open bidding", 16), 10, &SearchFilter::effective(&filters))
			.await
			.expect("search");

		assert_eq!(hits.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(), vec!["c1"]);
	}

	#[tokio::test]
	async fn queued_failures_are_consumed_in_order() {
		let embedder = FakeEmbedder::new(4);

		embedder.faults.fail_next(ProviderError::transient("fake", "busy"));

		assert!(embedder.embed("q").await.is_err());
		assert!(embedder.embed("q").await.is_ok());
		assert_eq!(embedder.faults.calls(), 2);
	}

	#[tokio::test]
	async fn memory_cache_deletes_by_prefix() {
		let cache = MemoryCacheBackend::new();
		let ttl = Duration::from_secs(60);

		cache.set("p:answer:1", b"a", ttl).await.expect("set");
		cache.set("p:answer:2", b"b", ttl).await.expect("set");
		cache.set("q:answer:1", b"c", ttl).await.expect("set");

		assert_eq!(cache.delete("p:*").await.expect("delete"), 2);
		assert_eq!(cache.keys(), vec!["q:answer:1".to_string()]);
	}
}
