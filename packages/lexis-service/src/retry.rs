//! Timeout and retry wrapper for provider calls.

use std::{future::Future, time::Duration};

use rand::Rng;

use lexis_domain::{ProviderError, ProviderResult};

/// Exponential backoff with full jitter. Only transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}
impl RetryPolicy {
	pub fn from_config(cfg: &lexis_config::Retry) -> Self {
		Self {
			max_retries: cfg.max_retries,
			base_delay: Duration::from_millis(cfg.base_delay_ms),
			max_delay: Duration::from_millis(cfg.max_delay_ms),
		}
	}

	pub fn none() -> Self {
		Self { max_retries: 0, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
	}

	/// Upper bound of the sleep before retry number `retry` (0-based).
	pub fn backoff_ceiling(&self, retry: u32) -> Duration {
		let factor = 2_u32.saturating_pow(retry.min(16));

		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}

	fn jittered_delay(&self, retry: u32) -> Duration {
		self.backoff_ceiling(retry).mul_f64(jitter_fraction())
	}

	/// Runs `call` under `timeout` per attempt. An attempt that times out counts as transient.
	pub async fn run<T, F, Fut>(
		&self,
		operation: &'static str,
		timeout: Duration,
		mut call: F,
	) -> ProviderResult<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = ProviderResult<T>>,
	{
		let mut retry = 0;

		loop {
			let err = match tokio::time::timeout(timeout, call()).await {
				Ok(Ok(value)) => {
					if retry > 0 {
						tracing::debug!(
							operation,
							attempts = retry + 1,
							"Provider call recovered."
						);
					}

					return Ok(value);
				},
				Ok(Err(err)) => err,
				Err(_) => ProviderError::transient(
					operation,
					format!("Timed out after {} ms.", timeout.as_millis()),
				),
			};

			if !err.is_transient() || retry >= self.max_retries {
				return Err(err);
			}

			let delay = self.jittered_delay(retry);

			tracing::warn!(
				operation,
				retry = retry + 1,
				max_retries = self.max_retries,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"Retrying transient provider failure."
			);
			tokio::time::sleep(delay).await;

			retry += 1;
		}
	}
}

fn jitter_fraction() -> f64 {
	rand::thread_rng().gen_range(0.0..1.0)
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn policy(max_retries: u32) -> RetryPolicy {
		RetryPolicy {
			max_retries,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(4),
		}
	}

	#[test]
	fn backoff_doubles_until_capped() {
		let policy = RetryPolicy {
			max_retries: 5,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(1_000),
		};

		assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(100));
		assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(200));
		assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(800));
		assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(1_000));
		assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(1_000));
	}

	#[test]
	fn jitter_stays_in_unit_interval() {
		for _ in 0..1_000 {
			let fraction = jitter_fraction();

			assert!((0.0..1.0).contains(&fraction));
		}
	}

	#[tokio::test]
	async fn retries_transient_until_success() {
		let calls = AtomicU32::new(0);
		let result = policy(2)
			.run("embed", Duration::from_secs(1), || async {
				let n = calls.fetch_add(1, Ordering::SeqCst);

				if n < 2 { Err(ProviderError::transient("embed", "busy")) } else { Ok(n) }
			})
			.await;

		assert_eq!(result, Ok(2));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn gives_up_after_max_retries() {
		let calls = AtomicU32::new(0);
		let result: ProviderResult<()> = policy(2)
			.run("search", Duration::from_secs(1), || async {
				calls.fetch_add(1, Ordering::SeqCst);

				Err(ProviderError::transient("search", "unavailable"))
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn permanent_errors_are_not_retried() {
		let calls = AtomicU32::new(0);
		let result: ProviderResult<()> = policy(2)
			.run("rerank", Duration::from_secs(1), || async {
				calls.fetch_add(1, Ordering::SeqCst);

				Err(ProviderError::permanent("rerank", "bad request"))
			})
			.await;

		assert!(matches!(result, Err(ProviderError::Permanent { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn attempt_timeout_is_transient() {
		let result: ProviderResult<()> = policy(0)
			.run("embed", Duration::from_millis(5), || async {
				tokio::time::sleep(Duration::from_millis(200)).await;

				Ok(())
			})
			.await;

		assert!(matches!(result, Err(ProviderError::Transient { .. })));
	}
}
