use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::VariantKind;

/// Metadata key carrying the owning document id.
pub const DOC_ID_KEY: &str = "doc_id";
/// Metadata key carrying the chunk text, when the index stores it inline.
pub const TEXT_KEY: &str = "text";
pub const SECTION_TITLE_KEY: &str = "section_title";
pub const DOC_TYPE_KEY: &str = "doc_type";

/// Opaque chunk metadata passed through from the search service.
pub type Metadata = Map<String, Value>;

/// One search hit for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateChunk {
	pub chunk_id: String,
	pub variant_kind: VariantKind,
	/// 1-based position within the variant's result list.
	pub rank: u32,
	pub raw_score: f32,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
	pub chunk_id: String,
	pub fused_score: f32,
	pub contributing_variants: BTreeSet<VariantKind>,
	/// Distinct variant instances that returned this chunk. Two paraphrases count twice.
	pub variant_hits: u32,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
	pub chunk_id: String,
	pub final_score: f32,
	pub metadata: Metadata,
}
impl RankedChunk {
	pub fn doc_id(&self) -> Option<&str> {
		self.metadata.get(DOC_ID_KEY).and_then(Value::as_str)
	}
}
impl From<FusedResult> for RankedChunk {
	fn from(fused: FusedResult) -> Self {
		Self { chunk_id: fused.chunk_id, final_score: fused.fused_score, metadata: fused.metadata }
	}
}

/// Why an answer is lower-confidence than a full pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
	/// Some, but not all, generated variants were dropped.
	EnhancementPartial,
	/// Every generated variant was dropped; only the original query ran.
	EnhancementFailed,
	/// At least one variant failed to embed or search.
	VariantSearchFailed,
	/// The cross-encoder failed; fused order was served.
	RerankFailed,
	/// Some candidates had no resolvable text and were ranked after scored ones.
	RerankTextMissing,
	/// The end-to-end deadline fired and a partial result was served.
	DeadlineExceeded,
}
impl Degradation {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::EnhancementPartial => "enhancement_partial",
			Self::EnhancementFailed => "enhancement_failed",
			Self::VariantSearchFailed => "variant_search_failed",
			Self::RerankFailed => "rerank_failed",
			Self::RerankTextMissing => "rerank_text_missing",
			Self::DeadlineExceeded => "deadline_exceeded",
		}
	}
}

/// Final retrieval output handed to the answer-generation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAnswer {
	pub chunks: Vec<RankedChunk>,
	pub cache_hit: bool,
	pub latency_ms: u64,
	pub degraded: bool,
	#[serde(default)]
	pub degradations: BTreeSet<Degradation>,
}
impl RankedAnswer {
	pub fn new(chunks: Vec<RankedChunk>, degradations: BTreeSet<Degradation>) -> Self {
		let degraded = !degradations.is_empty();

		Self { chunks, cache_hit: false, latency_ms: 0, degraded, degradations }
	}

	pub fn empty() -> Self {
		Self::new(Vec::new(), BTreeSet::new())
	}

	pub fn is_empty(&self) -> bool {
		self.chunks.is_empty()
	}

	pub fn document_ids(&self) -> BTreeSet<String> {
		self.chunks.iter().filter_map(|chunk| chunk.doc_id().map(str::to_string)).collect()
	}

	pub fn references_document(&self, doc_id: &str) -> bool {
		self.chunks.iter().any(|chunk| chunk.doc_id() == Some(doc_id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chunk(id: &str, doc_id: Option<&str>) -> RankedChunk {
		let mut metadata = Metadata::new();

		if let Some(doc_id) = doc_id {
			metadata.insert(DOC_ID_KEY.to_string(), Value::String(doc_id.to_string()));
		}

		RankedChunk { chunk_id: id.to_string(), final_score: 0.5, metadata }
	}

	#[test]
	fn degraded_flag_follows_reasons() {
		assert!(!RankedAnswer::empty().degraded);

		let answer =
			RankedAnswer::new(Vec::new(), BTreeSet::from([Degradation::RerankFailed]));

		assert!(answer.degraded);
	}

	#[test]
	fn collects_document_ids() {
		let answer = RankedAnswer::new(
			vec![chunk("c1", Some("doc-a")), chunk("c2", None), chunk("c3", Some("doc-a"))],
			BTreeSet::new(),
		);

		assert_eq!(answer.document_ids(), BTreeSet::from(["doc-a".to_string()]));
		assert!(answer.references_document("doc-a"));
		assert!(!answer.references_document("doc-b"));
	}
}
