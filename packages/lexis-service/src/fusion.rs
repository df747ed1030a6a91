//! Weighted reciprocal-rank fusion over per-variant candidate lists.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, BTreeSet, HashMap},
};

use lexis_domain::{CandidateChunk, FusedResult, Metadata, VariantKind, VariantSlot};

/// Candidates returned for one variant, in provider order.
#[derive(Debug, Clone)]
pub struct VariantHits {
	pub slot: VariantSlot,
	pub weight: f32,
	pub candidates: Vec<CandidateChunk>,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
	k: f32,
	width: usize,
}
impl FusionEngine {
	pub fn new(k: f32, width: u32) -> Self {
		Self { k, width: width as usize }
	}

	pub fn from_config(cfg: &lexis_config::Fusion) -> Self {
		Self::new(cfg.rrf_k, cfg.width)
	}

	/// Output length for a request, never below the requested `top_k`.
	pub fn width_for(&self, top_k: u32) -> usize {
		self.width.max(top_k as usize)
	}

	/// Fuses `results` into at most `width` unique chunks.
	///
	/// A chunk at rank `r` in a variant of weight `w` adds `w / (k + r)`. Variants are summed in
	/// input order. A chunk listed twice by one variant counts once at its best rank. Ties go to
	/// the chunk hit by more variants, then to the smaller chunk id.
	pub fn merge(&self, results: &[VariantHits], width: usize) -> Vec<FusedResult> {
		let mut acc: BTreeMap<String, Accumulated> = BTreeMap::new();

		for variant in results {
			let mut best: HashMap<&str, &CandidateChunk> = HashMap::new();
			let mut order: Vec<&str> = Vec::new();

			for candidate in &variant.candidates {
				let chunk_id = candidate.chunk_id.as_str();

				match best.get(chunk_id).map(|existing| existing.rank) {
					Some(rank) if rank <= candidate.rank => continue,
					Some(_) => {},
					None => order.push(chunk_id),
				}

				best.insert(chunk_id, candidate);
			}

			for chunk_id in order {
				let Some(candidate) = best.get(chunk_id) else {
					continue;
				};
				let contribution = variant.weight / (self.k + candidate.rank.max(1) as f32);
				let entry = acc.entry(chunk_id.to_string()).or_insert_with(|| Accumulated {
					score: 0.0,
					kinds: BTreeSet::new(),
					hits: 0,
					metadata: candidate.metadata.clone(),
				});

				entry.score += contribution;
				entry.hits += 1;

				entry.kinds.insert(variant.slot.kind);
			}
		}

		let mut fused: Vec<FusedResult> = acc
			.into_iter()
			.map(|(chunk_id, entry)| FusedResult {
				chunk_id,
				fused_score: entry.score,
				contributing_variants: entry.kinds,
				variant_hits: entry.hits,
				metadata: entry.metadata,
			})
			.collect();

		fused.sort_by(|a, b| {
			cmp_f32_desc(a.fused_score, b.fused_score)
				.then_with(|| b.variant_hits.cmp(&a.variant_hits))
				.then_with(|| a.chunk_id.cmp(&b.chunk_id))
		});
		fused.truncate(width);

		fused
	}
}

struct Accumulated {
	score: f32,
	kinds: BTreeSet<VariantKind>,
	hits: u32,
	metadata: Metadata,
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
