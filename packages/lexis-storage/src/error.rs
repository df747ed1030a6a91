use lexis_domain::{CacheUnavailable, ProviderError};

// gRPC status codes worth retrying: DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, ABORTED, UNAVAILABLE.
const TRANSIENT_GRPC_CODES: [i32; 4] = [4, 8, 10, 14];

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
	#[error("Vector search timed out after {timeout_ms} ms.")]
	Timeout { timeout_ms: u64 },
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
}
impl Error {
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Timeout { .. } => true,
			Self::Sqlx(err) => matches!(
				err,
				sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
			),
			Self::Qdrant(err) => match err.as_ref() {
				qdrant_client::QdrantError::ResponseError { status } =>
					TRANSIENT_GRPC_CODES.contains(&(status.code() as i32)),
				qdrant_client::QdrantError::ResourceExhaustedError { .. } => true,
				qdrant_client::QdrantError::Io(_) => true,
				_ => false,
			},
			Self::InvalidArgument(_) | Self::NotFound(_) => false,
		}
	}

	pub fn into_provider_error(self, provider: &str) -> ProviderError {
		if self.is_transient() {
			ProviderError::transient(provider, self.to_string())
		} else {
			ProviderError::permanent(provider, self.to_string())
		}
	}
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
impl From<Error> for CacheUnavailable {
	fn from(err: Error) -> Self {
		Self::new(err.to_string())
	}
}
