use reqwest::Client;
use serde::Deserialize;

use crate::{Error, Result};
use lexis_config::EmbeddingProviderConfig;
use lexis_domain::{BoxFuture, Embedder, ProviderResult};

/// OpenAI-compatible `/embeddings` client producing one vector per call.
pub struct HttpEmbedder {
	client: Client,
	url: String,
	provider_id: String,
	model: String,
	dimensions: u32,
}
impl HttpEmbedder {
	pub fn new(cfg: &EmbeddingProviderConfig) -> Result<Self> {
		let client = crate::build_client(cfg.timeout_ms, &cfg.api_key, &cfg.default_headers)?;

		Ok(Self {
			client,
			url: format!("{}{}", cfg.api_base, cfg.path),
			provider_id: cfg.provider_id.clone(),
			model: cfg.model.clone(),
			dimensions: cfg.dimensions,
		})
	}

	async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
		let body = serde_json::json!({
			"model": self.model,
			"input": text,
			"dimensions": self.dimensions,
		});
		let res = self.client.post(&self.url).json(&body).send().await?;
		let json = crate::read_json(res).await?;

		single_vector(serde_json::from_value(json)?)
	}
}
impl Embedder for HttpEmbedder {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<Vec<f32>>> {
		Box::pin(async move {
			self.embed_text(text).await.map_err(|err| err.into_provider_error(&self.provider_id))
		})
	}
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
	embedding: Vec<f32>,
}

// A single string input must come back as exactly one vector.
fn single_vector(response: EmbeddingResponse) -> Result<Vec<f32>> {
	let mut items = response.data.into_iter();

	match (items.next(), items.next()) {
		(Some(item), None) => Ok(item.embedding),
		(None, _) => Err(Error::invalid_response("Embedding provider returned no vectors.")),
		(Some(_), Some(_)) => Err(Error::invalid_response(
			"Embedding provider returned several vectors for one input.",
		)),
	}
}
