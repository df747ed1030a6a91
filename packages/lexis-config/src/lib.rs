mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Adaptive, Cache, Candidates, Config, Deadlines, EmbeddingProviderConfig, Enhancement, Fusion,
	LlmProviderConfig, Postgres, ProviderConfig, Providers, Qdrant, Retrieval, Retry, Service,
	Storage, VariantWeights,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::invalid("providers.embedding.dimensions", "must be greater than zero"));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::invalid(
			"providers.embedding.dimensions",
			"must match storage.qdrant.vector_dim",
		));
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::invalid("storage.qdrant.collection", "must be non-empty"));
	}
	if let Some(postgres) = cfg.storage.postgres.as_ref()
		&& postgres.pool_max_conns == 0
	{
		return Err(Error::invalid("storage.postgres.pool_max_conns", "must be greater than zero"));
	}

	for (label, timeout_ms) in [
		("storage.qdrant.timeout_ms", cfg.storage.qdrant.timeout_ms),
		("providers.embedding.timeout_ms", cfg.providers.embedding.timeout_ms),
		("providers.rerank.timeout_ms", cfg.providers.rerank.timeout_ms),
		("providers.generation.timeout_ms", cfg.providers.generation.timeout_ms),
		("retrieval.enhancement.timeout_ms", cfg.retrieval.enhancement.timeout_ms),
		("retrieval.deadlines.fast_ms", cfg.retrieval.deadlines.fast_ms),
		("retrieval.deadlines.balanced_ms", cfg.retrieval.deadlines.balanced_ms),
		("retrieval.deadlines.quality_ms", cfg.retrieval.deadlines.quality_ms),
		("retrieval.deadlines.adaptive_ms", cfg.retrieval.deadlines.adaptive_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::invalid(label, "must be greater than zero"));
		}
	}

	let fusion = &cfg.retrieval.fusion;

	if !fusion.rrf_k.is_finite() {
		return Err(Error::invalid("retrieval.fusion.rrf_k", "must be a finite number"));
	}
	if fusion.rrf_k < 0.0 {
		return Err(Error::invalid("retrieval.fusion.rrf_k", "must be zero or greater"));
	}
	if fusion.width == 0 {
		return Err(Error::invalid("retrieval.fusion.width", "must be greater than zero"));
	}
	if cfg.retrieval.candidates.per_variant_k == 0 {
		return Err(Error::invalid(
			"retrieval.candidates.per_variant_k",
			"must be greater than zero",
		));
	}

	// Fast mode never calls the generator, so its deadline is exempt.
	for (label, deadline_ms) in [
		("retrieval.deadlines.balanced_ms", cfg.retrieval.deadlines.balanced_ms),
		("retrieval.deadlines.quality_ms", cfg.retrieval.deadlines.quality_ms),
		("retrieval.deadlines.adaptive_ms", cfg.retrieval.deadlines.adaptive_ms),
	] {
		if cfg.retrieval.enhancement.timeout_ms >= deadline_ms {
			return Err(Error::invalid(
				"retrieval.enhancement.timeout_ms",
				format!("must be less than {label}"),
			));
		}
	}

	if cfg.retrieval.enhancement.max_tokens == 0 {
		return Err(Error::invalid("retrieval.enhancement.max_tokens", "must be greater than zero"));
	}

	let weights = &cfg.retrieval.weights;

	for (label, weight) in [
		("retrieval.weights.original", weights.original),
		("retrieval.weights.multi_query", weights.multi_query),
		("retrieval.weights.hyde", weights.hyde),
		("retrieval.weights.step_back", weights.step_back),
	] {
		if !weight.is_finite() {
			return Err(Error::invalid(label, "must be a finite number"));
		}
		if weight <= 0.0 {
			return Err(Error::invalid(label, "must be greater than zero"));
		}
	}

	let adaptive = &cfg.retrieval.adaptive;

	if adaptive.balanced_min_words == 0 {
		return Err(Error::invalid(
			"retrieval.adaptive.balanced_min_words",
			"must be greater than zero",
		));
	}
	if adaptive.quality_min_words <= adaptive.balanced_min_words {
		return Err(Error::invalid(
			"retrieval.adaptive.quality_min_words",
			"must be greater than retrieval.adaptive.balanced_min_words",
		));
	}
	if adaptive.quality_min_clauses < 2 {
		return Err(Error::invalid(
			"retrieval.adaptive.quality_min_clauses",
			"must be 2 or greater",
		));
	}
	if cfg.cache.enabled {
		if cfg.cache.key_prefix.is_empty() {
			return Err(Error::invalid(
				"cache.key_prefix",
				"must be non-empty when cache.enabled is true",
			));
		}
		if cfg.cache.key_prefix.contains('*') {
			return Err(Error::invalid("cache.key_prefix", "must not contain '*'"));
		}
		if cfg.cache.l1_max_entries == 0 {
			return Err(Error::invalid("cache.l1_max_entries", "must be greater than zero"));
		}
		if cfg.cache.l1_ttl_secs == 0 {
			return Err(Error::invalid("cache.l1_ttl_secs", "must be greater than zero"));
		}
		if cfg.cache.l2_ttl_secs == 0 {
			return Err(Error::invalid("cache.l2_ttl_secs", "must be greater than zero"));
		}
	}
	if cfg.retry.base_delay_ms == 0 {
		return Err(Error::invalid("retry.base_delay_ms", "must be greater than zero"));
	}
	if cfg.retry.max_delay_ms < cfg.retry.base_delay_ms {
		return Err(Error::invalid(
			"retry.max_delay_ms",
			"must be greater than or equal to retry.base_delay_ms",
		));
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("generation", &cfg.providers.generation.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::invalid(format!("providers.{label}.api_key"), "must be non-empty"));
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.cache.key_prefix = cfg.cache.key_prefix.trim().trim_end_matches(':').to_string();

	if cfg
		.storage
		.postgres
		.as_ref()
		.map(|postgres| postgres.dsn.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.storage.postgres = None;
	}
}
