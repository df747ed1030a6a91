pub mod cache;
pub mod enhance;
pub mod fusion;
pub mod invalidate;
pub mod mode;
pub mod rerank;
pub mod retrieve;
pub mod retry;
pub mod search;

mod error;

pub use cache::{CacheStore, Computed, Invalidated, Lookup};
pub use enhance::{Expansion, QueryEnhancer};
pub use error::{Error, Result};
pub use fusion::{FusionEngine, VariantHits};
pub use mode::{ModeProfile, ModeTable};
pub use rerank::{Reranked, Reranker};
pub use retrieve::RetrieveRequest;
pub use retry::RetryPolicy;
pub use search::{EmbedderClient, SearchClient};

use std::{sync::Arc, time::Duration};

use lexis_config::Config;
use lexis_domain::{CacheBackend, ChunkLookup, CrossEncoder, Embedder, TextGenerator, VectorIndex};

/// External collaborators the retrieval core calls out to.
#[derive(Clone)]
pub struct Providers {
	pub generator: Arc<dyn TextGenerator>,
	pub embedder: Arc<dyn Embedder>,
	pub index: Arc<dyn VectorIndex>,
	pub cross_encoder: Arc<dyn CrossEncoder>,
	pub chunk_lookup: Arc<dyn ChunkLookup>,
}
impl Providers {
	pub fn new(
		generator: Arc<dyn TextGenerator>,
		embedder: Arc<dyn Embedder>,
		index: Arc<dyn VectorIndex>,
		cross_encoder: Arc<dyn CrossEncoder>,
		chunk_lookup: Arc<dyn ChunkLookup>,
	) -> Self {
		Self { generator, embedder, index, cross_encoder, chunk_lookup }
	}
}

/// Retrieval orchestrator. Owns the cache store and every pipeline stage; all settings are
/// resolved from [`Config`] at construction.
pub struct RetrievalService {
	modes: ModeTable,
	cache: CacheStore,
	enhancer: QueryEnhancer,
	embedder: Arc<EmbedderClient>,
	search: Arc<SearchClient>,
	fusion: FusionEngine,
	reranker: Reranker,
	per_variant_k: u32,
}
impl RetrievalService {
	pub fn new(cfg: &Config, providers: Providers, l2: Option<Arc<dyn CacheBackend>>) -> Self {
		let retry = RetryPolicy::from_config(&cfg.retry);
		let retrieval = &cfg.retrieval;
		let embedding = &cfg.providers.embedding;
		let enhancer = QueryEnhancer::new(
			providers.generator,
			&retrieval.weights,
			&retrieval.adaptive,
			Duration::from_millis(retrieval.enhancement.timeout_ms),
			retrieval.enhancement.max_tokens,
			retry,
		);
		let embedder = EmbedderClient::new(
			providers.embedder,
			embedding.dimensions,
			Duration::from_millis(embedding.timeout_ms),
			retry,
		);
		let search = SearchClient::new(
			providers.index,
			Duration::from_millis(cfg.storage.qdrant.timeout_ms),
			retry,
		);
		let reranker = Reranker::new(
			providers.cross_encoder,
			providers.chunk_lookup,
			Duration::from_millis(cfg.providers.rerank.timeout_ms),
			retry,
		);

		Self {
			modes: ModeTable::from_config(&retrieval.deadlines),
			cache: CacheStore::new(&cfg.cache, l2),
			enhancer,
			embedder: Arc::new(embedder),
			search: Arc::new(search),
			fusion: FusionEngine::from_config(&retrieval.fusion),
			reranker,
			per_variant_k: retrieval.candidates.per_variant_k,
		}
	}

	pub fn cache(&self) -> &CacheStore {
		&self.cache
	}

	pub fn modes(&self) -> &ModeTable {
		&self.modes
	}
}
