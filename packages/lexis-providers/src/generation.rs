use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};
use lexis_config::LlmProviderConfig;
use lexis_domain::{BoxFuture, ProviderResult, TextGenerator};

/// Chat-completions client used to write query reformulations.
pub struct HttpTextGenerator {
	client: Client,
	url: String,
	provider_id: String,
	model: String,
	temperature: f32,
}
impl HttpTextGenerator {
	pub fn new(cfg: &LlmProviderConfig) -> Result<Self> {
		let client = crate::build_client(cfg.timeout_ms, &cfg.api_key, &cfg.default_headers)?;

		Ok(Self {
			client,
			url: format!("{}{}", cfg.api_base, cfg.path),
			provider_id: cfg.provider_id.clone(),
			model: cfg.model.clone(),
			temperature: cfg.temperature,
		})
	}

	async fn complete(&self, prompt: &str, max_tokens: u32, timeout: Duration) -> Result<String> {
		let body = serde_json::json!({
			"model": self.model,
			"temperature": self.temperature,
			"max_tokens": max_tokens,
			"messages": [{ "role": "user", "content": prompt }],
		});
		let res = self.client.post(&self.url).timeout(timeout).json(&body).send().await?;
		let json = crate::read_json(res).await?;

		tracing::debug!(provider_id = %self.provider_id, max_tokens, "Generation call completed.");

		parse_completion_content(&json)
	}
}
impl TextGenerator for HttpTextGenerator {
	fn generate<'a>(
		&'a self,
		prompt: &'a str,
		max_tokens: u32,
		timeout: Duration,
	) -> BoxFuture<'a, ProviderResult<String>> {
		Box::pin(async move {
			self.complete(prompt, max_tokens, timeout)
				.await
				.map_err(|err| err.into_provider_error(&self.provider_id))
		})
	}
}

fn parse_completion_content(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|message| message.get("content"))
		.and_then(|content| content.as_str())
		.map(|content| content.trim().to_string())
		.ok_or_else(|| Error::invalid_response("Generation response is missing message content."))
}
