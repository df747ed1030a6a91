//! Cross-encoder reranking of the fused list.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::task::JoinSet;

use crate::{fusion::cmp_f32_desc, retry::RetryPolicy};
use lexis_domain::{
	ChunkLookup, CrossEncoder, DOC_ID_KEY, Degradation, FusedResult, ProviderError, RankedChunk,
	TEXT_KEY,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
	pub chunks: Vec<RankedChunk>,
	pub degradations: BTreeSet<Degradation>,
}

pub struct Reranker {
	encoder: Arc<dyn CrossEncoder>,
	lookup: Arc<dyn ChunkLookup>,
	timeout: Duration,
	retry: RetryPolicy,
}
impl Reranker {
	pub fn new(
		encoder: Arc<dyn CrossEncoder>,
		lookup: Arc<dyn ChunkLookup>,
		timeout: Duration,
		retry: RetryPolicy,
	) -> Self {
		Self { encoder, lookup, timeout, retry }
	}

	/// Reorders `fused` by cross-encoder score and keeps `final_k`.
	///
	/// Candidates without resolvable text follow the scored ones in fused order. If scoring fails,
	/// the fused order is served instead and the result is tagged.
	pub async fn rerank(
		&self,
		query: &str,
		mut fused: Vec<FusedResult>,
		final_k: usize,
	) -> Reranked {
		let mut degradations = BTreeSet::new();

		if fused.is_empty() {
			return Reranked { chunks: Vec::new(), degradations };
		}

		let texts = self.resolve_texts(&mut fused).await;
		let mut scored_idx = Vec::new();
		let mut scored_texts = Vec::new();
		let mut unresolved = Vec::new();

		for (idx, text) in texts.into_iter().enumerate() {
			match text {
				Some(text) => {
					scored_idx.push(idx);
					scored_texts.push(text);
				},
				None => unresolved.push(idx),
			}
		}

		if !unresolved.is_empty() {
			tracing::warn!(
				unresolved = unresolved.len(),
				candidates = fused.len(),
				"Some rerank candidates have no text."
			);
			degradations.insert(Degradation::RerankTextMissing);
		}
		if scored_texts.is_empty() {
			return Reranked { chunks: fused_top(fused, final_k), degradations };
		}

		let scores = match self.score(query, &scored_texts).await {
			Ok(scores) => scores,
			Err(err) => {
				tracing::warn!(error = %err, "Reranking failed. Serving fused order.");
				degradations.insert(Degradation::RerankFailed);

				return Reranked { chunks: fused_top(fused, final_k), degradations };
			},
		};
		let mut order: Vec<(usize, f32)> = scored_idx.into_iter().zip(scores).collect();

		// Stable sort keeps fused order among equal scores.
		order.sort_by(|a, b| cmp_f32_desc(a.1, b.1));

		let mut slots: Vec<Option<FusedResult>> = fused.into_iter().map(Some).collect();
		let mut chunks = Vec::with_capacity(final_k.min(slots.len()));

		for (idx, score) in order {
			if let Some(item) = slots[idx].take() {
				chunks.push(RankedChunk {
					chunk_id: item.chunk_id,
					final_score: score,
					metadata: item.metadata,
				});
			}
		}
		for idx in unresolved {
			if let Some(item) = slots[idx].take() {
				chunks.push(RankedChunk::from(item));
			}
		}

		chunks.truncate(final_k);

		Reranked { chunks, degradations }
	}

	async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ProviderError> {
		let scores =
			self.retry.run("rerank", self.timeout, || self.encoder.score(query, texts)).await?;

		if scores.len() != texts.len() {
			return Err(ProviderError::permanent(
				"rerank",
				format!("Expected {} scores, got {}.", texts.len(), scores.len()),
			));
		}

		Ok(scores)
	}

	// Inline text first, then concurrent lookups for the rest. Lookups also fill in a missing
	// document id so invalidation can find the chunk later.
	async fn resolve_texts(&self, fused: &mut [FusedResult]) -> Vec<Option<String>> {
		let mut texts: Vec<Option<String>> = fused
			.iter()
			.map(|item| {
				item.metadata
					.get(TEXT_KEY)
					.and_then(Value::as_str)
					.filter(|text| !text.trim().is_empty())
					.map(str::to_string)
			})
			.collect();
		let mut tasks = JoinSet::new();

		for (idx, item) in fused.iter().enumerate() {
			if texts[idx].is_some() {
				continue;
			}

			let lookup = self.lookup.clone();
			let chunk_id = item.chunk_id.clone();
			let timeout = self.timeout;

			tasks.spawn(async move {
				let result = tokio::time::timeout(timeout, lookup.get(&chunk_id)).await;

				(idx, chunk_id, result)
			});
		}

		while let Some(joined) = tasks.join_next().await {
			let Ok((idx, chunk_id, result)) = joined else {
				continue;
			};

			match result {
				Ok(Ok(record)) if !record.text.trim().is_empty() => {
					let metadata = &mut fused[idx].metadata;

					if !metadata.contains_key(DOC_ID_KEY) && !record.doc_id.is_empty() {
						metadata.insert(DOC_ID_KEY.to_string(), Value::String(record.doc_id));
					}

					texts[idx] = Some(record.text);
				},
				Ok(Ok(_)) => {
					tracing::debug!(chunk_id = %chunk_id, "Chunk lookup returned empty text.");
				},
				Ok(Err(err)) => {
					tracing::debug!(chunk_id = %chunk_id, error = %err, "Chunk lookup failed.");
				},
				Err(_) => {
					tracing::debug!(chunk_id = %chunk_id, "Chunk lookup timed out.");
				},
			}
		}

		texts
	}
}

/// Top `final_k` of the fused list with fused scores as final scores.
pub fn fused_top(fused: Vec<FusedResult>, final_k: usize) -> Vec<RankedChunk> {
	fused.into_iter().take(final_k).map(RankedChunk::from).collect()
}
