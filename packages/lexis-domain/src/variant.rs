use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{Mode, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
	Original,
	MultiQuery,
	Hyde,
	StepBack,
}
impl VariantKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Original => "original",
			Self::MultiQuery => "multi_query",
			Self::Hyde => "hyde",
			Self::StepBack => "step_back",
		}
	}
}
impl fmt::Display for VariantKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Position of a variant within a mode's variant set. `ordinal` separates variants that share a
/// kind, e.g. the three paraphrases of the quality set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantSlot {
	pub kind: VariantKind,
	pub ordinal: u8,
}
impl VariantSlot {
	pub const fn new(kind: VariantKind, ordinal: u8) -> Self {
		Self { kind, ordinal }
	}

	pub const fn original() -> Self {
		Self::new(VariantKind::Original, 0)
	}
}
impl fmt::Display for VariantSlot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind {
			VariantKind::Original => f.write_str(self.kind.as_str()),
			kind => write!(f, "{}#{}", kind.as_str(), self.ordinal),
		}
	}
}

const FAST_SLOTS: [VariantSlot; 1] = [VariantSlot::original()];
const BALANCED_SLOTS: [VariantSlot; 4] = [
	VariantSlot::original(),
	VariantSlot::new(VariantKind::MultiQuery, 1),
	VariantSlot::new(VariantKind::MultiQuery, 2),
	VariantSlot::new(VariantKind::StepBack, 1),
];
const QUALITY_SLOTS: [VariantSlot; 6] = [
	VariantSlot::original(),
	VariantSlot::new(VariantKind::MultiQuery, 1),
	VariantSlot::new(VariantKind::MultiQuery, 2),
	VariantSlot::new(VariantKind::MultiQuery, 3),
	VariantSlot::new(VariantKind::Hyde, 1),
	VariantSlot::new(VariantKind::StepBack, 1),
];

/// The three fixed variant sets. `adaptive` picks one of them per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantSet {
	Fast,
	Balanced,
	Quality,
}
impl VariantSet {
	/// Static set for a mode, or `None` when the set depends on the query (adaptive).
	pub fn for_mode(mode: Mode) -> Option<Self> {
		match mode {
			Mode::Fast => Some(Self::Fast),
			Mode::Balanced => Some(Self::Balanced),
			Mode::Quality => Some(Self::Quality),
			Mode::Adaptive => None,
		}
	}

	pub fn slots(self) -> &'static [VariantSlot] {
		match self {
			Self::Fast => &FAST_SLOTS,
			Self::Balanced => &BALANCED_SLOTS,
			Self::Quality => &QUALITY_SLOTS,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Fast => "fast",
			Self::Balanced => "balanced",
			Self::Quality => "quality",
		}
	}
}

/// One reformulation of the user's query, consumed once by embedding and search.
#[derive(Debug, Clone)]
pub struct QueryVariant {
	source: Arc<Query>,
	slot: VariantSlot,
	text: String,
	weight: f32,
}
impl QueryVariant {
	pub fn new(
		source: Arc<Query>,
		slot: VariantSlot,
		text: impl Into<String>,
		weight: f32,
	) -> Self {
		Self { source, slot, text: text.into(), weight }
	}

	/// The unmodified user query with the given fusion weight.
	pub fn original(source: Arc<Query>, weight: f32) -> Self {
		let text = source.text().to_string();

		Self { source, slot: VariantSlot::original(), text, weight }
	}

	pub fn source(&self) -> &Query {
		&self.source
	}

	pub fn slot(&self) -> VariantSlot {
		self.slot
	}

	pub fn kind(&self) -> VariantKind {
		self.slot.kind
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn weight(&self) -> f32 {
		self.weight
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn variant_sets_match_mode_table() {
		assert_eq!(VariantSet::Fast.slots().len(), 1);
		assert_eq!(VariantSet::Balanced.slots().len(), 4);
		assert_eq!(VariantSet::Quality.slots().len(), 6);
		assert!(VariantSet::for_mode(Mode::Adaptive).is_none());

		for set in [VariantSet::Fast, VariantSet::Balanced, VariantSet::Quality] {
			assert_eq!(set.slots()[0], VariantSlot::original());
		}
	}

	#[test]
	fn slot_labels_include_ordinal() {
		assert_eq!(VariantSlot::original().to_string(), "original");
		assert_eq!(VariantSlot::new(VariantKind::MultiQuery, 2).to_string(), "multi_query#2");
	}
}
