pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced to callers of the retrieval core. Provider and cache failures never appear
/// here; they degrade the answer instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {0}")]
	InvalidRequest(#[from] lexis_domain::Error),
	#[error("Retrieval deadline of {deadline_ms} ms passed before any query variant completed.")]
	DeadlineExceeded { deadline_ms: u64 },
}
