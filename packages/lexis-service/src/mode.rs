//! Per-mode pipeline settings.

use std::time::Duration;

use lexis_config::Deadlines;
use lexis_domain::{Mode, VariantSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
	/// Fixed variant set, or `None` when it is chosen per query.
	pub variant_set: Option<VariantSet>,
	/// End-to-end budget for a cache-miss computation.
	pub deadline: Duration,
	pub rerank: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ModeTable {
	fast: ModeProfile,
	balanced: ModeProfile,
	quality: ModeProfile,
	adaptive: ModeProfile,
}
impl ModeTable {
	pub fn from_config(cfg: &Deadlines) -> Self {
		let profile = |mode: Mode, deadline_ms: u64| ModeProfile {
			variant_set: VariantSet::for_mode(mode),
			deadline: Duration::from_millis(deadline_ms),
			rerank: mode != Mode::Fast,
		};

		Self {
			fast: profile(Mode::Fast, cfg.fast_ms),
			balanced: profile(Mode::Balanced, cfg.balanced_ms),
			quality: profile(Mode::Quality, cfg.quality_ms),
			adaptive: profile(Mode::Adaptive, cfg.adaptive_ms),
		}
	}

	pub fn profile(&self, mode: Mode) -> ModeProfile {
		match mode {
			Mode::Fast => self.fast,
			Mode::Balanced => self.balanced,
			Mode::Quality => self.quality,
			Mode::Adaptive => self.adaptive,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fast_mode_skips_rerank() {
		let table = ModeTable::from_config(&Deadlines::default());

		assert!(!table.profile(Mode::Fast).rerank);
		assert!(Mode::ALL.iter().filter(|mode| **mode != Mode::Fast).all(|mode| {
			table.profile(*mode).rerank
		}));
	}

	#[test]
	fn deadlines_come_from_config() {
		let cfg = Deadlines { fast_ms: 10, balanced_ms: 20, quality_ms: 30, adaptive_ms: 40 };
		let table = ModeTable::from_config(&cfg);

		assert_eq!(table.profile(Mode::Quality).deadline, Duration::from_millis(30));
		assert_eq!(table.profile(Mode::Adaptive).deadline, Duration::from_millis(40));
		assert_eq!(table.profile(Mode::Adaptive).variant_set, None);
		assert_eq!(table.profile(Mode::Balanced).variant_set, Some(VariantSet::Balanced));
	}
}
