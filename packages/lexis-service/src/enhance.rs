//! Query expansion into weighted variants.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;
use unicode_segmentation::UnicodeSegmentation;

use crate::retry::RetryPolicy;
use lexis_config::{Adaptive, VariantWeights};
use lexis_domain::{
	Degradation, Mode, ProviderError, Query, QueryVariant, TextGenerator, VariantKind, VariantSet,
	VariantSlot,
};

const CLAUSE_PUNCTUATION: [char; 4] = [',', ';', ':', '?'];
const CLAUSE_WORDS: [&str; 10] =
	["and", "or", "but", "which", "whereas", "if", "when", "while", "unless", "because"];

/// Variants for one query plus how enhancement degraded, if it did.
#[derive(Debug, Clone)]
pub struct Expansion {
	pub set: VariantSet,
	pub variants: Vec<QueryVariant>,
	pub degradation: Option<Degradation>,
}

pub struct QueryEnhancer {
	generator: Arc<dyn TextGenerator>,
	weights: Weights,
	thresholds: Thresholds,
	timeout: Duration,
	max_tokens: u32,
	retry: RetryPolicy,
}
impl QueryEnhancer {
	pub fn new(
		generator: Arc<dyn TextGenerator>,
		weights: &VariantWeights,
		adaptive: &Adaptive,
		timeout: Duration,
		max_tokens: u32,
		retry: RetryPolicy,
	) -> Self {
		Self {
			generator,
			weights: Weights::from(weights),
			thresholds: Thresholds::from(adaptive),
			timeout,
			max_tokens,
			retry,
		}
	}

	/// Variant set for the query: the mode's fixed set, or a complexity classification when the
	/// mode has none (adaptive).
	pub fn resolve_set(&self, query: &Query, fixed: Option<VariantSet>) -> VariantSet {
		fixed.unwrap_or_else(|| classify_complexity(query.text(), &self.thresholds))
	}

	pub async fn expand(&self, query: Arc<Query>, fixed: Option<VariantSet>) -> Expansion {
		let set = self.resolve_set(&query, fixed);
		let original =
			QueryVariant::original(query.clone(), self.weights.for_kind(VariantKind::Original));
		let generated_slots: Vec<VariantSlot> =
			set.slots().iter().copied().filter(|slot| slot.kind != VariantKind::Original).collect();

		if generated_slots.is_empty() {
			return Expansion { set, variants: vec![original], degradation: None };
		}

		let outputs = self.generate_all(query.text(), &generated_slots).await;
		let mut variants = vec![original];
		let mut seen = vec![query.text().to_lowercase()];

		for (slot, output) in generated_slots.iter().zip(outputs) {
			let text = match output {
				Ok(text) => text.trim().to_string(),
				Err(err) => {
					tracing::warn!(
						mode = query.mode().as_str(),
						variant = %slot,
						error = %err,
						"Dropping query variant after generation failure."
					);

					continue;
				},
			};

			if text.is_empty() {
				tracing::warn!(variant = %slot, "Dropping empty query variant.");

				continue;
			}

			let folded = text.to_lowercase();

			if seen.contains(&folded) {
				tracing::debug!(variant = %slot, "Dropping duplicate query variant.");

				continue;
			}

			seen.push(folded);
			variants.push(QueryVariant::new(
				query.clone(),
				*slot,
				text,
				self.weights.for_kind(slot.kind),
			));
		}

		let kept = variants.len() - 1;
		let degradation = if kept == 0 {
			Some(Degradation::EnhancementFailed)
		} else if kept < generated_slots.len() {
			Some(Degradation::EnhancementPartial)
		} else {
			None
		};

		Expansion { set, variants, degradation }
	}

	// One generation call per slot, all in flight at once, each retried on transient failures.
	// Results come back in slot order.
	async fn generate_all(
		&self,
		text: &str,
		slots: &[VariantSlot],
	) -> Vec<Result<String, ProviderError>> {
		let mut tasks = JoinSet::new();

		for (idx, slot) in slots.iter().enumerate() {
			let generator = self.generator.clone();
			let prompt = build_prompt(*slot, text);
			let max_tokens = self.max_tokens;
			let timeout = self.timeout;
			let retry = self.retry;

			tasks.spawn(async move {
				let result = retry
					.run("generation", timeout, || generator.generate(&prompt, max_tokens, timeout))
					.await;

				(idx, result)
			});
		}

		let mut outputs: Vec<Result<String, ProviderError>> = slots
			.iter()
			.map(|_| Err(ProviderError::permanent("generation", "Variant task did not finish.")))
			.collect();

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((idx, result)) => outputs[idx] = result,
				Err(err) => tracing::error!(error = %err, "Variant generation task failed."),
			}
		}

		outputs
	}
}

#[derive(Debug, Clone, Copy)]
struct Weights {
	original: f32,
	multi_query: f32,
	hyde: f32,
	step_back: f32,
}
impl Weights {
	fn for_kind(&self, kind: VariantKind) -> f32 {
		match kind {
			VariantKind::Original => self.original,
			VariantKind::MultiQuery => self.multi_query,
			VariantKind::Hyde => self.hyde,
			VariantKind::StepBack => self.step_back,
		}
	}
}
impl From<&VariantWeights> for Weights {
	fn from(cfg: &VariantWeights) -> Self {
		Self {
			original: cfg.original,
			multi_query: cfg.multi_query,
			hyde: cfg.hyde,
			step_back: cfg.step_back,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
	pub balanced_min_words: usize,
	pub quality_min_words: usize,
	pub quality_min_clauses: usize,
}
impl From<&Adaptive> for Thresholds {
	fn from(cfg: &Adaptive) -> Self {
		Self {
			balanced_min_words: cfg.balanced_min_words as usize,
			quality_min_words: cfg.quality_min_words as usize,
			quality_min_clauses: cfg.quality_min_clauses as usize,
		}
	}
}

/// Picks a variant set from word count and clause markers.
pub fn classify_complexity(text: &str, thresholds: &Thresholds) -> VariantSet {
	let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
	let punctuation =
		text.trim_end_matches('?').chars().filter(|ch| CLAUSE_PUNCTUATION.contains(ch)).count();
	let conjunctions = words.iter().filter(|word| CLAUSE_WORDS.contains(&word.as_str())).count();
	let clauses = 1 + punctuation + conjunctions;

	if words.len() >= thresholds.quality_min_words || clauses >= thresholds.quality_min_clauses {
		VariantSet::Quality
	} else if words.len() >= thresholds.balanced_min_words {
		VariantSet::Balanced
	} else {
		VariantSet::Fast
	}
}

/// Prompt asking the generator for one variant of `text`.
pub fn build_prompt(slot: VariantSlot, text: &str) -> String {
	match slot.kind {
		VariantKind::Original => text.to_string(),
		VariantKind::MultiQuery => format!(
			"Rewrite the question below as paraphrase number {} for searching legal and bidding \
			 documents. Keep its meaning and any legal terms, change the wording. Reply with the \
			 rewritten question only.\n\nQuestion: {text}",
			slot.ordinal
		),
		VariantKind::Hyde => format!(
			"Write a short passage, worded like an article of a law, decree, circular, or bidding \
			 document, that would answer the question below. Reply with the passage only.\n\n\
			 Question: {text}"
		),
		VariantKind::StepBack => format!(
			"Rewrite the question below as a broader question about the legal principle or \
			 procedure behind it. Reply with the broader question only.\n\nQuestion: {text}"
		),
	}
}

/// Log label for a mode, with the resolved set for adaptive queries.
pub(crate) fn mode_label(mode: Mode, set: VariantSet) -> String {
	match mode {
		Mode::Adaptive => format!("adaptive/{}", set.as_str()),
		_ => mode.as_str().to_string(),
	}
}
