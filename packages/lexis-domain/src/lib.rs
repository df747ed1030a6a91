pub mod answer;
pub mod cache_key;
pub mod provider;
pub mod query;
pub mod variant;

mod error;

pub use answer::{
	CandidateChunk, DOC_ID_KEY, DOC_TYPE_KEY, Degradation, FusedResult, Metadata, RankedAnswer,
	RankedChunk, SECTION_TITLE_KEY, TEXT_KEY,
};
pub use cache_key::{cache_key, cache_key_prefix, normalize_text};
pub use error::{Error, Result};
pub use provider::{
	ACTIVE_STATUS, BoxFuture, CacheBackend, CacheUnavailable, ChunkLookup, ChunkRecord,
	CrossEncoder, Embedder, ProviderError, ProviderResult, SearchFilter, SearchHit, TextGenerator,
	VectorIndex,
};
pub use query::{DateRange, Filters, MAX_TOP_K, MIN_TOP_K, Mode, Query};
pub use variant::{QueryVariant, VariantKind, VariantSet, VariantSlot};
