use std::sync::Arc;

use lexis_config::Config;
use lexis_domain::CacheBackend;
use lexis_providers::{HttpCrossEncoder, HttpEmbedder, HttpTextGenerator};
use lexis_service::{Providers, RetrievalService};
use lexis_storage::{Db, PgCacheBackend, QdrantIndex};

pub struct AppState {
	pub service: RetrievalService,
	/// Shared cache tier, when `storage.postgres` is configured.
	pub l2: Option<PgCacheBackend>,
}
impl AppState {
	pub async fn new(config: &Config) -> color_eyre::Result<Self> {
		let index = Arc::new(QdrantIndex::new(&config.storage.qdrant)?);
		let providers = Providers::new(
			Arc::new(HttpTextGenerator::new(&config.providers.generation)?),
			Arc::new(HttpEmbedder::new(&config.providers.embedding)?),
			index.clone(),
			Arc::new(HttpCrossEncoder::new(&config.providers.rerank)?),
			index,
		);
		let l2 = match &config.storage.postgres {
			Some(postgres) => {
				let db = Db::connect(postgres).await?;

				db.ensure_schema().await?;

				Some(PgCacheBackend::new(db.pool))
			},
			None => {
				tracing::info!("No Postgres configured. Using the local cache tier only.");

				None
			},
		};
		let backend = l2.clone().map(|l2| Arc::new(l2) as Arc<dyn CacheBackend>);
		let service = RetrievalService::new(config, providers, backend);

		Ok(Self { service, l2 })
	}
}
