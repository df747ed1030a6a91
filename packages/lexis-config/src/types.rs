use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub retry: Retry,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	/// Optional. When absent the shared L2 cache tier is disabled and only the process-local tier
	/// is used.
	pub postgres: Option<Postgres>,
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	#[serde(default = "default_vector_name")]
	pub vector_name: String,
	pub vector_dim: u32,
	#[serde(default = "default_search_timeout_ms")]
	pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub generation: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	#[serde(default = "default_embed_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_rerank_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	#[serde(default = "default_generation_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub fusion: Fusion,
	pub candidates: Candidates,
	pub enhancement: Enhancement,
	pub weights: VariantWeights,
	pub deadlines: Deadlines,
	pub adaptive: Adaptive,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Fusion {
	/// RRF smoothing constant `K` in `w / (K + rank)`.
	pub rrf_k: f32,
	/// Fused list length handed to the reranker.
	pub width: u32,
}
impl Default for Fusion {
	fn default() -> Self {
		Self { rrf_k: 60.0, width: 20 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Candidates {
	/// Nearest-neighbor results requested per query variant.
	pub per_variant_k: u32,
}
impl Default for Candidates {
	fn default() -> Self {
		Self { per_variant_k: 20 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Enhancement {
	pub timeout_ms: u64,
	pub max_tokens: u32,
}
impl Default for Enhancement {
	fn default() -> Self {
		Self { timeout_ms: 1_200, max_tokens: 256 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VariantWeights {
	pub original: f32,
	pub multi_query: f32,
	pub hyde: f32,
	pub step_back: f32,
}
impl Default for VariantWeights {
	fn default() -> Self {
		Self { original: 1.0, multi_query: 0.6, hyde: 0.5, step_back: 0.5 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Deadlines {
	pub fast_ms: u64,
	pub balanced_ms: u64,
	pub quality_ms: u64,
	pub adaptive_ms: u64,
}
impl Default for Deadlines {
	fn default() -> Self {
		Self { fast_ms: 1_500, balanced_ms: 3_000, quality_ms: 5_000, adaptive_ms: 4_000 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Adaptive {
	/// Queries with at least this many words use the balanced variant set.
	pub balanced_min_words: u32,
	/// Queries with at least this many words use the quality variant set.
	pub quality_min_words: u32,
	/// Queries with at least this many clauses use the quality variant set.
	pub quality_min_clauses: u32,
}
impl Default for Adaptive {
	fn default() -> Self {
		Self { balanced_min_words: 6, quality_min_words: 18, quality_min_clauses: 3 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub key_prefix: String,
	pub l1_max_entries: u64,
	pub l1_ttl_secs: u64,
	pub l2_ttl_secs: u64,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			enabled: true,
			key_prefix: "lexis:retrieval".to_string(),
			l1_max_entries: 10_000,
			l1_ttl_secs: 300,
			l2_ttl_secs: 3_600,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retry {
	pub max_retries: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
}
impl Default for Retry {
	fn default() -> Self {
		Self { max_retries: 2, base_delay_ms: 100, max_delay_ms: 1_000 }
	}
}

fn default_vector_name() -> String {
	"dense".to_string()
}

fn default_search_timeout_ms() -> u64 {
	3_000
}

fn default_embed_timeout_ms() -> u64 {
	2_000
}

fn default_rerank_timeout_ms() -> u64 {
	2_000
}

fn default_generation_timeout_ms() -> u64 {
	1_200
}
