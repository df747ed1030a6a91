use lexis_domain::ProviderError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

const MAX_BODY_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("Provider returned HTTP {status}: {body}")]
	Status { status: u16, body: String },
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
}
impl Error {
	pub(crate) fn status(status: u16, body: String) -> Self {
		let body = if body.chars().count() > MAX_BODY_CHARS {
			body.chars().take(MAX_BODY_CHARS).collect()
		} else {
			body
		};

		Self::Status { status, body }
	}

	pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
		Self::InvalidResponse { message: message.into() }
	}

	/// Maps the adapter failure onto the transient/permanent split the retry policy keys on.
	pub fn into_provider_error(self, provider: &str) -> ProviderError {
		match &self {
			Self::Status { status, .. } =>
				ProviderError::from_status(provider, *status, self.to_string()),
			Self::Reqwest(err) if err.is_timeout() || err.is_connect() =>
				ProviderError::transient(provider, self.to_string()),
			Self::Reqwest(err) => match err.status() {
				Some(status) =>
					ProviderError::from_status(provider, status.as_u16(), self.to_string()),
				None => ProviderError::permanent(provider, self.to_string()),
			},
			_ => ProviderError::permanent(provider, self.to_string()),
		}
	}
}
