pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Malformed query input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Query text must be non-empty.")]
	EmptyText,
	#[error("top_k must be between {min} and {max}, got {got}.")]
	TopKOutOfRange { got: u32, min: u32, max: u32 },
	#[error("Unknown retrieval mode '{0}'.")]
	UnknownMode(String),
	#[error("Date range start {from} is after its end {to}.")]
	InvertedDateRange { from: time::Date, to: time::Date },
}
