use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Error, Result};

pub const MIN_TOP_K: u32 = 1;
pub const MAX_TOP_K: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
	Fast,
	Balanced,
	Quality,
	Adaptive,
}
impl Mode {
	pub const ALL: [Mode; 4] = [Mode::Fast, Mode::Balanced, Mode::Quality, Mode::Adaptive];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Fast => "fast",
			Self::Balanced => "balanced",
			Self::Quality => "quality",
			Self::Adaptive => "adaptive",
		}
	}
}
impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Mode {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"fast" => Ok(Self::Fast),
			"balanced" => Ok(Self::Balanced),
			"quality" => Ok(Self::Quality),
			"adaptive" => Ok(Self::Adaptive),
			_ => Err(Error::UnknownMode(raw.to_string())),
		}
	}
}

/// Inclusive issue/effective date window. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
	pub from: Option<Date>,
	pub to: Option<Date>,
}

/// Caller-supplied metadata filters.
///
/// `status` is accepted for compatibility with upstream request shapes but never reaches the
/// index: the effective filter always pins `status = active`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
	#[serde(default)]
	pub doc_types: BTreeSet<String>,
	#[serde(default)]
	pub categories: BTreeSet<String>,
	#[serde(default)]
	pub date_range: Option<DateRange>,
	#[serde(default)]
	pub status: Option<String>,
}
impl Filters {
	fn normalized(self) -> Result<Self> {
		let clean = |values: BTreeSet<String>| -> BTreeSet<String> {
			values
				.into_iter()
				.map(|value| value.trim().to_string())
				.filter(|value| !value.is_empty())
				.collect()
		};
		let date_range = match self.date_range {
			Some(DateRange { from: Some(from), to: Some(to) }) if from > to =>
				return Err(Error::InvertedDateRange { from, to }),
			Some(DateRange { from: None, to: None }) => None,
			other => other,
		};

		Ok(Self {
			doc_types: clean(self.doc_types),
			categories: clean(self.categories),
			date_range,
			status: self.status,
		})
	}
}

/// One inbound retrieval request. Construction validates every field, so a `Query` value is
/// always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
	text: String,
	mode: Mode,
	filters: Filters,
	top_k: u32,
}
impl Query {
	pub fn new(text: impl Into<String>, mode: Mode, filters: Filters, top_k: u32) -> Result<Self> {
		let text = text.into();
		let trimmed = text.trim();

		if trimmed.is_empty() {
			return Err(Error::EmptyText);
		}
		if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
			return Err(Error::TopKOutOfRange { got: top_k, min: MIN_TOP_K, max: MAX_TOP_K });
		}

		Ok(Self { text: trimmed.to_string(), mode, filters: filters.normalized()?, top_k })
	}

	/// Builds a query from a raw mode label, as received from an outer request layer.
	pub fn parse(
		text: impl Into<String>,
		mode: &str,
		filters: Filters,
		top_k: u32,
	) -> Result<Self> {
		Self::new(text, mode.parse()?, filters, top_k)
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	pub fn filters(&self) -> &Filters {
		&self.filters
	}

	pub fn top_k(&self) -> u32 {
		self.top_k
	}
}
