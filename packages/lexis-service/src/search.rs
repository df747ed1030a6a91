//! Embedding and nearest-neighbor facades with timeout, retry, and the effective filter.

use std::{sync::Arc, time::Duration};

use crate::retry::RetryPolicy;
use lexis_domain::{
	CandidateChunk, Embedder, Filters, ProviderError, ProviderResult, SearchFilter, VariantKind,
	VectorIndex,
};

pub struct EmbedderClient {
	embedder: Arc<dyn Embedder>,
	dimensions: usize,
	timeout: Duration,
	retry: RetryPolicy,
}
impl EmbedderClient {
	pub fn new(
		embedder: Arc<dyn Embedder>,
		dimensions: u32,
		timeout: Duration,
		retry: RetryPolicy,
	) -> Self {
		Self { embedder, dimensions: dimensions as usize, timeout, retry }
	}

	/// Embeds `text`, rejecting vectors of the wrong length as a permanent failure.
	pub async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
		let vector = self.retry.run("embedding", self.timeout, || self.embedder.embed(text)).await?;

		if vector.len() != self.dimensions {
			return Err(ProviderError::permanent(
				"embedding",
				format!(
					"Embedding has {} dimensions, expected {}.",
					vector.len(),
					self.dimensions
				),
			));
		}

		Ok(vector)
	}
}

pub struct SearchClient {
	index: Arc<dyn VectorIndex>,
	timeout: Duration,
	retry: RetryPolicy,
}
impl SearchClient {
	pub fn new(index: Arc<dyn VectorIndex>, timeout: Duration, retry: RetryPolicy) -> Self {
		Self { index, timeout, retry }
	}

	/// Searches with the effective filter derived from `filters`. Candidates keep provider order
	/// and carry 1-based ranks.
	pub async fn search(
		&self,
		vector: &[f32],
		top_k: u32,
		filters: &Filters,
		variant_kind: VariantKind,
	) -> ProviderResult<Vec<CandidateChunk>> {
		let filter = SearchFilter::effective(filters);
		let hits = self
			.retry
			.run("vector_search", self.timeout, || self.index.search(vector, top_k, &filter))
			.await?;

		Ok(hits
			.into_iter()
			.enumerate()
			.map(|(idx, hit)| CandidateChunk {
				chunk_id: hit.chunk_id,
				variant_kind,
				rank: idx as u32 + 1,
				raw_score: hit.score,
				metadata: hit.metadata,
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use lexis_domain::ACTIVE_STATUS;
	use lexis_testkit::{FakeChunk, FakeEmbedder, FakeIndex};

	fn no_retry() -> RetryPolicy {
		RetryPolicy::none()
	}

	#[tokio::test]
	async fn dimension_mismatch_is_permanent() {
		let client = EmbedderClient::new(
			Arc::new(FakeEmbedder::new(4)),
			8,
			Duration::from_secs(1),
			no_retry(),
		);
		let err = client.embed("open bidding").await.expect_err("mismatch");

		assert!(!err.is_transient());
	}

	#[tokio::test]
	async fn embed_retries_transient_failures() {
		let embedder = Arc::new(FakeEmbedder::new(8));

		embedder.faults.fail_next(ProviderError::transient("embedding", "503"));

		let policy = RetryPolicy {
			max_retries: 2,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
		};
		let client = EmbedderClient::new(embedder.clone(), 8, Duration::from_secs(1), policy);

		assert_eq!(client.embed("open bidding").await.expect("embed").len(), 8);
		assert_eq!(embedder.faults.calls(), 2);
	}

	#[tokio::test]
	async fn search_pins_status_and_assigns_ranks() {
		let index = Arc::new(FakeIndex::with_chunks(
			8,
			[
				FakeChunk::new("c1", "d1", "open bidding conditions"),
				FakeChunk::new("c2", "d2", "open bidding conditions").status("repealed"),
				FakeChunk::new("c3", "d3", "bidding security deposit"),
			],
		));
		let client = SearchClient::new(index.clone(), Duration::from_secs(1), no_retry());
		let filters = Filters { status: Some("repealed".to_string()), ..Filters::default() };
		let vector = lexis_testkit::embed_text("open bidding conditions", 8);
		let candidates = client
			.search(&vector, 10, &filters, VariantKind::Original)
			.await
			.expect("search");

		assert!(candidates.iter().all(|c| c.chunk_id != "c2"));
		assert_eq!(candidates[0].chunk_id, "c1");
		assert_eq!(candidates.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![1, 2]);
		assert!(index.received().iter().all(|(filter, _)| filter.status() == ACTIVE_STATUS));
	}
}
