//! Collaborator interfaces consumed by the retrieval core.
//!
//! Each trait is object-safe and returns a boxed future so adapters (HTTP, Qdrant, Postgres) and
//! test fakes can be swapped behind an `Arc<dyn _>`.

use std::{future::Future, pin::Pin, time::Duration};

use time::Date;

use crate::{Filters, Metadata};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The only document status the index may ever return.
pub const ACTIVE_STATUS: &str = "active";

/// Failure reported by a remote scoring, generation, or search service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
	/// Timeout, connection failure, 429, or 503. Worth retrying.
	#[error("{provider} is temporarily unavailable: {message}")]
	Transient { provider: String, message: String },
	/// Semantic rejection or malformed response. Retrying will not help.
	#[error("{provider} rejected the request: {message}")]
	Permanent { provider: String, message: String },
}
impl ProviderError {
	pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Transient { provider: provider.into(), message: message.into() }
	}

	pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Permanent { provider: provider.into(), message: message.into() }
	}

	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient { .. })
	}

	/// Classifies an HTTP status code returned by a provider.
	pub fn from_status(
		provider: impl Into<String>,
		status: u16,
		message: impl Into<String>,
	) -> Self {
		match status {
			408 | 429 | 503 => Self::transient(provider, message),
			_ => Self::permanent(provider, message),
		}
	}
}

/// Shared cache tier is unreachable or returned garbage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cache backend unavailable: {message}")]
pub struct CacheUnavailable {
	pub message: String,
}
impl CacheUnavailable {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

/// Metadata filter as sent to the index. Only constructible through [`SearchFilter::effective`],
/// so `status` is always [`ACTIVE_STATUS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
	doc_types: Vec<String>,
	categories: Vec<String>,
	date_from: Option<Date>,
	date_to: Option<Date>,
	status: &'static str,
}
impl SearchFilter {
	pub fn effective(filters: &Filters) -> Self {
		let (date_from, date_to) =
			filters.date_range.map(|range| (range.from, range.to)).unwrap_or((None, None));

		Self {
			doc_types: filters.doc_types.iter().cloned().collect(),
			categories: filters.categories.iter().cloned().collect(),
			date_from,
			date_to,
			status: ACTIVE_STATUS,
		}
	}

	pub fn doc_types(&self) -> &[String] {
		&self.doc_types
	}

	pub fn categories(&self) -> &[String] {
		&self.categories
	}

	pub fn date_from(&self) -> Option<Date> {
		self.date_from
	}

	pub fn date_to(&self) -> Option<Date> {
		self.date_to
	}

	pub fn status(&self) -> &str {
		self.status
	}
}

/// Raw hit from the nearest-neighbor service, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
	pub chunk_id: String,
	pub score: f32,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
	pub text: String,
	pub doc_id: String,
	pub section_title: Option<String>,
	pub doc_type: Option<String>,
}

pub trait TextGenerator
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		prompt: &'a str,
		max_tokens: u32,
		timeout: Duration,
	) -> BoxFuture<'a, ProviderResult<String>>;
}

pub trait Embedder
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<Vec<f32>>>;
}

pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
		filter: &'a SearchFilter,
	) -> BoxFuture<'a, ProviderResult<Vec<SearchHit>>>;
}

pub trait CrossEncoder
where
	Self: Send + Sync,
{
	/// Scores aligned with `chunk_texts`.
	fn score<'a>(
		&'a self,
		query: &'a str,
		chunk_texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<f32>>>;
}

pub trait ChunkLookup
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, chunk_id: &'a str) -> BoxFuture<'a, ProviderResult<ChunkRecord>>;
}

/// Shared (L2) byte cache with per-entry TTL.
pub trait CacheBackend
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheUnavailable>>;

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a [u8],
		ttl: Duration,
	) -> BoxFuture<'a, Result<(), CacheUnavailable>>;

	/// Deletes every key matching `pattern`. A trailing `*` matches any suffix; otherwise the
	/// pattern is an exact key. Returns the number of removed entries.
	fn delete<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64, CacheUnavailable>>;
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use time::macros::date;

	use super::*;
	use crate::DateRange;

	#[test]
	fn effective_filter_always_pins_active_status() {
		for status in [None, Some("archived".to_string()), Some("active".to_string())] {
			let filters = Filters { status, ..Filters::default() };

			assert_eq!(SearchFilter::effective(&filters).status(), ACTIVE_STATUS);
		}
	}

	#[test]
	fn effective_filter_copies_sets_and_dates() {
		let filters = Filters {
			doc_types: BTreeSet::from(["law".to_string(), "decree".to_string()]),
			categories: BTreeSet::from(["bidding".to_string()]),
			date_range: Some(DateRange { from: Some(date!(2023 - 01 - 01)), to: None }),
			status: None,
		};
		let effective = SearchFilter::effective(&filters);

		assert_eq!(effective.doc_types(), ["decree".to_string(), "law".to_string()]);
		assert_eq!(effective.categories(), ["bidding".to_string()]);
		assert_eq!(effective.date_from(), Some(date!(2023 - 01 - 01)));
		assert_eq!(effective.date_to(), None);
	}

	#[test]
	fn classifies_status_codes() {
		assert!(ProviderError::from_status("embed", 429, "slow down").is_transient());
		assert!(ProviderError::from_status("embed", 503, "unavailable").is_transient());
		assert!(!ProviderError::from_status("embed", 400, "bad filter").is_transient());
		assert!(!ProviderError::from_status("embed", 500, "boom").is_transient());
	}
}
