//! Hooks called by document management when cached answers may be stale.

use crate::{Invalidated, RetrievalService};

impl RetrievalService {
	/// Purges every cached answer citing `doc_id`. Called when a document's status or metadata
	/// changes, or when it is deleted.
	pub async fn invalidate_by_document(&self, doc_id: &str) -> Invalidated {
		let doc_id = doc_id.trim();

		if doc_id.is_empty() {
			tracing::warn!("Ignoring invalidation with an empty document id.");

			return Invalidated::default();
		}

		self.cache.invalidate_document(doc_id).await
	}

	/// Purges every cached answer.
	pub async fn clear_all(&self) -> Invalidated {
		self.cache.clear().await
	}
}
