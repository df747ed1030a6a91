//! End-to-end retrieval: cache check, enhancement, embed+search fan-out, fusion, rerank.
//!
//! A cache-miss computation runs under the mode's deadline. Stages record their progress as they
//! settle so that, when the deadline fires, the variants that already finished can still be fused
//! and served as a degraded answer.

use std::{
	collections::BTreeSet,
	sync::{Arc, Mutex},
	time::Instant,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::{
	Computed, Error, Lookup, ModeProfile, RetrievalService, Result, enhance::mode_label,
	fusion::VariantHits, rerank::fused_top,
};
use lexis_domain::{
	Degradation, Filters, FusedResult, Query, QueryVariant, RankedAnswer, VariantSet, cache_key,
	cache_key_prefix,
};

const DEFAULT_MODE: &str = "balanced";
const DEFAULT_TOP_K: u32 = 5;

/// Unvalidated retrieval request, as received from an outer layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveRequest {
	pub query: String,
	#[serde(default = "default_mode")]
	pub mode: String,
	#[serde(default)]
	pub filters: Filters,
	#[serde(default = "default_top_k")]
	pub top_k: u32,
}
impl RetrieveRequest {
	pub fn into_query(self) -> Result<Query> {
		Ok(Query::parse(self.query, &self.mode, self.filters, self.top_k)?)
	}
}

impl RetrievalService {
	/// Validates `req` and retrieves it.
	pub async fn retrieve_request(&self, req: RetrieveRequest) -> Result<RankedAnswer> {
		self.retrieve(req.into_query()?).await
	}

	/// Returns the ranked chunks for `query`.
	///
	/// Provider failures degrade the answer instead of failing the call. The only error after
	/// validation is [`Error::DeadlineExceeded`], returned when no query variant finished its
	/// search in time.
	pub async fn retrieve(&self, query: Query) -> Result<RankedAnswer> {
		let started_at = Instant::now();
		let hash = cache_key(&query);
		let key = self.cache.answer_key(&hash);
		let profile = self.modes.profile(query.mode());
		let query = Arc::new(query);
		let lookup = self
			.cache
			.get_or_compute(&key, || self.compute(query.clone(), profile, &hash))
			.await
			.inspect_err(|err| {
				tracing::warn!(
					cache_key_prefix = cache_key_prefix(&hash),
					mode = query.mode().as_str(),
					error = %err,
					"Retrieval failed."
				);
			})?;
		let mut answer = RankedAnswer::clone(lookup.answer());

		answer.cache_hit = lookup.is_hit();
		answer.latency_ms = started_at.elapsed().as_millis() as u64;

		tracing::info!(
			cache_key_prefix = cache_key_prefix(&hash),
			mode = query.mode().as_str(),
			cache_hit = answer.cache_hit,
			joined = matches!(lookup, Lookup::Joined(_)),
			chunks = answer.chunks.len(),
			degraded = answer.degraded,
			latency_ms = answer.latency_ms,
			"Retrieval finished."
		);

		Ok(answer)
	}

	async fn compute(
		&self,
		query: Arc<Query>,
		profile: ModeProfile,
		hash: &str,
	) -> Result<Computed> {
		let progress = Arc::new(Mutex::new(Progress::default()));
		let pipeline = self.run_pipeline(query.clone(), profile, progress.clone());
		let computed = match tokio::time::timeout(profile.deadline, pipeline).await {
			Ok(computed) => computed,
			// Dropping the pipeline aborts its sub-tasks.
			Err(_) => self.salvage(&query, profile, &progress)?,
		};
		let progress = progress.lock().unwrap_or_else(|err| err.into_inner());
		let label = progress.set.map(|set| mode_label(query.mode(), set));
		let degradations: Vec<&str> =
			computed.answer.degradations.iter().map(|reason| reason.as_str()).collect();

		if computed.answer.degraded {
			tracing::warn!(
				cache_key_prefix = cache_key_prefix(hash),
				mode = label.as_deref().unwrap_or(query.mode().as_str()),
				degradations = ?degradations,
				variants_completed = progress.completed.len(),
				variants_failed = progress.failed,
				"Serving degraded retrieval result."
			);
		} else {
			tracing::debug!(
				cache_key_prefix = cache_key_prefix(hash),
				mode = label.as_deref().unwrap_or(query.mode().as_str()),
				variants_completed = progress.completed.len(),
				"Retrieval computed."
			);
		}

		Ok(computed)
	}

	async fn run_pipeline(
		&self,
		query: Arc<Query>,
		profile: ModeProfile,
		progress: Arc<Mutex<Progress>>,
	) -> Computed {
		let expansion = self.enhancer.expand(query.clone(), profile.variant_set).await;

		{
			let mut progress = progress.lock().unwrap_or_else(|err| err.into_inner());

			progress.set = Some(expansion.set);

			if let Some(reason) = expansion.degradation {
				progress.degradations.insert(reason);
			}
		}

		self.search_variants(&query, expansion.variants, &progress).await;

		let (hits, any_succeeded, mut degradations) = {
			let progress = progress.lock().unwrap_or_else(|err| err.into_inner());
			let any_succeeded = !progress.completed.is_empty();

			(progress.ordered_hits(), any_succeeded, progress.degradations.clone())
		};

		// Nothing to fuse. Served empty and left uncached so the next call retries the providers.
		if !any_succeeded {
			let answer = RankedAnswer::new(Vec::new(), degradations);

			return Computed { answer, cacheable: false };
		}

		let fused = self.fusion.merge(&hits, self.fusion.width_for(query.top_k()));
		let final_k = query.top_k() as usize;

		progress.lock().unwrap_or_else(|err| err.into_inner()).fused = Some(fused.clone());

		let chunks = if profile.rerank {
			let reranked = self.reranker.rerank(query.text(), fused, final_k).await;

			degradations.extend(reranked.degradations);

			reranked.chunks
		} else {
			fused_top(fused, final_k)
		};

		Computed { answer: RankedAnswer::new(chunks, degradations), cacheable: true }
	}

	// Partial-success join: every variant settles before this returns, failures included.
	async fn search_variants(
		&self,
		query: &Query,
		variants: Vec<QueryVariant>,
		progress: &Mutex<Progress>,
	) {
		let top_k = self.per_variant_k.max(query.top_k());
		let mut tasks = JoinSet::new();

		for (idx, variant) in variants.into_iter().enumerate() {
			let embedder = self.embedder.clone();
			let search = self.search.clone();

			tasks.spawn(async move {
				let result = match embedder.embed(variant.text()).await {
					Ok(vector) =>
						search
							.search(&vector, top_k, variant.source().filters(), variant.kind())
							.await,
					Err(err) => Err(err),
				};

				(idx, variant, result)
			});
		}

		while let Some(joined) = tasks.join_next().await {
			let mut progress = progress.lock().unwrap_or_else(|err| err.into_inner());

			match joined {
				Ok((idx, variant, Ok(candidates))) => {
					progress.completed.push((
						idx,
						VariantHits { slot: variant.slot(), weight: variant.weight(), candidates },
					));
				},
				Ok((_, variant, Err(err))) => {
					tracing::warn!(
						variant_kind = variant.kind().as_str(),
						variant = %variant.slot(),
						error = %err,
						"Variant search failed."
					);

					progress.failed += 1;

					progress.degradations.insert(Degradation::VariantSearchFailed);
				},
				Err(err) => {
					tracing::error!(error = %err, "Variant search task failed.");

					progress.failed += 1;

					progress.degradations.insert(Degradation::VariantSearchFailed);
				},
			}
		}
	}

	// Builds the best answer available when the deadline fired mid-pipeline.
	fn salvage(
		&self,
		query: &Query,
		profile: ModeProfile,
		progress: &Mutex<Progress>,
	) -> Result<Computed> {
		let progress = progress.lock().unwrap_or_else(|err| err.into_inner());
		let deadline_ms = profile.deadline.as_millis() as u64;
		let final_k = query.top_k() as usize;
		let mut degradations = progress.degradations.clone();

		degradations.insert(Degradation::DeadlineExceeded);

		// Fusion already ran, so the deadline fired during reranking.
		if let Some(fused) = &progress.fused {
			let answer = RankedAnswer::new(fused_top(fused.clone(), final_k), degradations);

			return Ok(Computed { answer, cacheable: true });
		}
		if progress.completed.is_empty() {
			return Err(Error::DeadlineExceeded { deadline_ms });
		}

		let hits = progress.ordered_hits();
		let fused = self.fusion.merge(&hits, self.fusion.width_for(query.top_k()));

		tracing::debug!(
			deadline_ms,
			variants_completed = hits.len(),
			"Fusing completed variants after deadline."
		);

		Ok(Computed {
			answer: RankedAnswer::new(fused_top(fused, final_k), degradations),
			cacheable: true,
		})
	}
}

// Pipeline state visible to the deadline handler.
#[derive(Default)]
struct Progress {
	set: Option<VariantSet>,
	degradations: BTreeSet<Degradation>,
	completed: Vec<(usize, VariantHits)>,
	failed: usize,
	fused: Option<Vec<FusedResult>>,
}
impl Progress {
	// Completed variants in expansion order, so fusion sums are reproducible.
	fn ordered_hits(&self) -> Vec<VariantHits> {
		let mut completed: Vec<&(usize, VariantHits)> = self.completed.iter().collect();

		completed.sort_by_key(|(idx, _)| *idx);

		completed.into_iter().map(|(_, hits)| hits.clone()).collect()
	}
}

fn default_mode() -> String {
	DEFAULT_MODE.to_string()
}

fn default_top_k() -> u32 {
	DEFAULT_TOP_K
}
