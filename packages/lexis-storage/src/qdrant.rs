use std::{collections::HashMap, time::Duration};

use qdrant_client::qdrant::{
	Condition, DatetimeRange, Filter, GetPointsBuilder, PointId, Query, QueryPointsBuilder,
	Timestamp, Value, point_id::PointIdOptions, value::Kind,
};
use serde_json::{Map, Number};
use time::{Date, OffsetDateTime};

use crate::{Error, Result};
use lexis_domain::{
	BoxFuture, ChunkLookup, ChunkRecord, DOC_ID_KEY, DOC_TYPE_KEY, Metadata, ProviderResult,
	SECTION_TITLE_KEY, SearchFilter, SearchHit, TEXT_KEY, VectorIndex,
};

pub const STATUS_FIELD: &str = "status";
pub const DOC_TYPE_FIELD: &str = DOC_TYPE_KEY;
pub const CATEGORY_FIELD: &str = "category";
pub const ISSUE_DATE_FIELD: &str = "issue_date";

const PROVIDER_ID: &str = "qdrant";

/// Chunk collection in Qdrant. Serves nearest-neighbor search and chunk text lookup.
pub struct QdrantIndex {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_name: String,
	pub vector_dim: u32,
	timeout: Duration,
}
impl QdrantIndex {
	pub fn new(cfg: &lexis_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			vector_name: cfg.vector_name.clone(),
			vector_dim: cfg.vector_dim,
			timeout: Duration::from_millis(cfg.timeout_ms),
		})
	}

	async fn nearest(
		&self,
		vector: &[f32],
		top_k: u32,
		filter: &SearchFilter,
	) -> Result<Vec<SearchHit>> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Query vector has {} dimensions, collection expects {}.",
				vector.len(),
				self.vector_dim
			)));
		}

		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.using(self.vector_name.as_str())
			.filter(build_filter(filter))
			.with_payload(true)
			.limit(top_k as u64);
		let response = tokio::time::timeout(self.timeout, self.client.query(search))
			.await
			.map_err(|_| Error::Timeout { timeout_ms: self.timeout.as_millis() as u64 })??;
		let mut hits = Vec::with_capacity(response.result.len());

		for point in response.result {
			let Some(chunk_id) = point.id.as_ref().and_then(point_id_to_string) else {
				tracing::warn!(
					collection = %self.collection,
					"Skipping search hit without a point id."
				);

				continue;
			};

			hits.push(SearchHit {
				chunk_id,
				score: point.score,
				metadata: payload_to_metadata(point.payload),
			});
		}

		Ok(hits)
	}

	async fn fetch_chunk(&self, chunk_id: &str) -> Result<ChunkRecord> {
		let request = GetPointsBuilder::new(self.collection.clone(), vec![parse_point_id(chunk_id)])
			.with_payload(true);
		let response = tokio::time::timeout(self.timeout, self.client.get_points(request))
			.await
			.map_err(|_| Error::Timeout { timeout_ms: self.timeout.as_millis() as u64 })??;
		let Some(point) = response.result.into_iter().next() else {
			return Err(Error::NotFound(format!("Chunk {chunk_id} is not indexed.")));
		};
		let metadata = payload_to_metadata(point.payload);
		let text = metadata_str(&metadata, TEXT_KEY)
			.ok_or_else(|| Error::NotFound(format!("Chunk {chunk_id} has no text payload.")))?;
		let doc_id = metadata_str(&metadata, DOC_ID_KEY).unwrap_or_default();

		Ok(ChunkRecord {
			text,
			doc_id,
			section_title: metadata_str(&metadata, SECTION_TITLE_KEY),
			doc_type: metadata_str(&metadata, DOC_TYPE_KEY),
		})
	}
}
impl VectorIndex for QdrantIndex {
	fn search<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
		filter: &'a SearchFilter,
	) -> BoxFuture<'a, ProviderResult<Vec<SearchHit>>> {
		Box::pin(async move {
			self.nearest(vector, top_k, filter)
				.await
				.map_err(|err| err.into_provider_error(PROVIDER_ID))
		})
	}
}
impl ChunkLookup for QdrantIndex {
	fn get<'a>(&'a self, chunk_id: &'a str) -> BoxFuture<'a, ProviderResult<ChunkRecord>> {
		Box::pin(async move {
			self.fetch_chunk(chunk_id).await.map_err(|err| err.into_provider_error(PROVIDER_ID))
		})
	}
}

/// Translates the effective filter into Qdrant conditions. `status` is always present.
pub fn build_filter(filter: &SearchFilter) -> Filter {
	let mut must = vec![Condition::matches(STATUS_FIELD, filter.status().to_string())];

	if !filter.doc_types().is_empty() {
		must.push(Condition::matches(DOC_TYPE_FIELD, filter.doc_types().to_vec()));
	}
	if !filter.categories().is_empty() {
		must.push(Condition::matches(CATEGORY_FIELD, filter.categories().to_vec()));
	}
	if let Some(range) = issue_date_range(filter.date_from(), filter.date_to()) {
		must.push(range);
	}

	Filter { must, should: Vec::new(), must_not: Vec::new(), min_should: None }
}

// Both bounds are inclusive calendar days, so `to` becomes "before the next midnight".
fn issue_date_range(from: Option<Date>, to: Option<Date>) -> Option<Condition> {
	let gte = from.map(|date| to_timestamp(date.midnight().assume_utc()));
	let lt = to.map(|date| match date.next_day() {
		Some(next) => to_timestamp(next.midnight().assume_utc()),
		None => to_timestamp(date.midnight().assume_utc()),
	});

	if gte.is_none() && lt.is_none() {
		return None;
	}

	Some(Condition::datetime_range(
		ISSUE_DATE_FIELD,
		DatetimeRange { lt, gt: None, gte, lte: None },
	))
}

fn to_timestamp(at: OffsetDateTime) -> Timestamp {
	Timestamp { seconds: at.unix_timestamp(), nanos: at.nanosecond() as i32 }
}

fn parse_point_id(chunk_id: &str) -> PointId {
	match chunk_id.parse::<u64>() {
		Ok(num) => PointId::from(num),
		Err(_) => PointId::from(chunk_id.to_string()),
	}
}

fn point_id_to_string(point_id: &PointId) -> Option<String> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Some(id.clone()),
		Some(PointIdOptions::Num(num)) => Some(num.to_string()),
		None => None,
	}
}

fn metadata_str(metadata: &Metadata, key: &str) -> Option<String> {
	metadata.get(key).and_then(serde_json::Value::as_str).map(str::to_string)
}

fn payload_to_metadata(payload: HashMap<String, Value>) -> Metadata {
	let mut sorted: Vec<(String, Value)> = payload.into_iter().collect();

	sorted.sort_by(|a, b| a.0.cmp(&b.0));

	sorted.into_iter().map(|(key, value)| (key, value_to_json(value))).collect()
}

fn value_to_json(value: Value) -> serde_json::Value {
	match value.kind {
		Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
		Some(Kind::BoolValue(flag)) => serde_json::Value::Bool(flag),
		Some(Kind::IntegerValue(num)) => serde_json::Value::Number(num.into()),
		Some(Kind::DoubleValue(num)) =>
			Number::from_f64(num).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
		Some(Kind::StringValue(text)) => serde_json::Value::String(text),
		Some(Kind::ListValue(list)) =>
			serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect()),
		Some(Kind::StructValue(object)) => {
			let map: Map<String, serde_json::Value> =
				object.fields.into_iter().map(|(key, value)| (key, value_to_json(value))).collect();

			serde_json::Value::Object(map)
		},
	}
}
