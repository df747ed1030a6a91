use serde_json::Value;

use crate::Query;

const CACHE_KEY_SCHEMA_VERSION: i32 = 1;

/// Lower-cases, trims, and collapses internal whitespace runs to one space.
pub fn normalize_text(text: &str) -> String {
	text.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Stable hex digest identifying a query's retrieval result.
///
/// Filters are hashed in sorted order. `status` is left out because the effective filter pins it.
pub fn cache_key(query: &Query) -> String {
	let filters = query.filters();
	let date_range = filters.date_range.map(|range| {
		serde_json::json!({
			"from": range.from.map(|date| date.to_string()),
			"to": range.to.map(|date| date.to_string()),
		})
	});
	let payload = serde_json::json!({
		"kind": "retrieval",
		"schema_version": CACHE_KEY_SCHEMA_VERSION,
		"text": normalize_text(query.text()),
		"mode": query.mode().as_str(),
		"doc_types": filters.doc_types.iter().collect::<Vec<_>>(),
		"categories": filters.categories.iter().collect::<Vec<_>>(),
		"date_range": date_range.unwrap_or(Value::Null),
		"top_k": query.top_k(),
	});

	blake3::hash(payload.to_string().as_bytes()).to_hex().to_string()
}

const LOG_PREFIX_CHARS: usize = 12;

/// Leading slice of a key, for logs. Counted in chars so document ids outside ASCII stay whole.
pub fn cache_key_prefix(key: &str) -> &str {
	match key.char_indices().nth(LOG_PREFIX_CHARS) {
		Some((end, _)) => &key[..end],
		None => key,
	}
}
