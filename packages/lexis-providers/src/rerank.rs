use reqwest::Client;
use serde::Deserialize;

use crate::{Error, Result};
use lexis_config::ProviderConfig;
use lexis_domain::{BoxFuture, CrossEncoder, ProviderResult};

/// Cross-encoder client for Cohere/Jina-style `/rerank` endpoints.
pub struct HttpCrossEncoder {
	client: Client,
	url: String,
	provider_id: String,
	model: String,
}
impl HttpCrossEncoder {
	pub fn new(cfg: &ProviderConfig) -> Result<Self> {
		let client = crate::build_client(cfg.timeout_ms, &cfg.api_key, &cfg.default_headers)?;

		Ok(Self {
			client,
			url: format!("{}{}", cfg.api_base, cfg.path),
			provider_id: cfg.provider_id.clone(),
			model: cfg.model.clone(),
		})
	}

	async fn score_batch(&self, query: &str, docs: &[String]) -> Result<Vec<f32>> {
		let body = serde_json::json!({
			"model": self.model,
			"query": query,
			"documents": docs,
			"top_n": docs.len(),
		});
		let res = self.client.post(&self.url).json(&body).send().await?;
		let json = crate::read_json(res).await?;

		align_scores(serde_json::from_value(json)?, docs.len())
	}
}
impl CrossEncoder for HttpCrossEncoder {
	fn score<'a>(
		&'a self,
		query: &'a str,
		chunk_texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<f32>>> {
		Box::pin(async move {
			self.score_batch(query, chunk_texts)
				.await
				.map_err(|err| err.into_provider_error(&self.provider_id))
		})
	}
}

/// Results come back sorted by relevance. `index` points into the submitted documents.
#[derive(Debug, Deserialize)]
struct RerankResponse {
	#[serde(alias = "data")]
	results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
	index: usize,
	#[serde(alias = "score")]
	relevance_score: f32,
}

fn align_scores(response: RerankResponse, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![None; doc_count];

	for result in response.results {
		let Some(slot) = scores.get_mut(result.index) else {
			return Err(Error::invalid_response(format!(
				"Rerank index {} is out of range for {doc_count} documents.",
				result.index
			)));
		};

		*slot = Some(result.relevance_score);
	}

	scores
		.into_iter()
		.enumerate()
		.map(|(idx, score)| {
			score.ok_or_else(|| {
				Error::invalid_response(format!("Rerank response omitted document {idx}."))
			})
		})
		.collect()
}
