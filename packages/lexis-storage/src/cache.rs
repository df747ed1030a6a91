//! Postgres-backed shared cache tier.

use std::time::Duration;

use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use crate::{Error, Result};
use lexis_domain::{BoxFuture, CacheBackend, CacheUnavailable};

/// Shared answer cache in the `retrieval_cache` table. Expired rows are ignored on read and
/// overwritten on write.
#[derive(Clone)]
pub struct PgCacheBackend {
	pool: PgPool,
}
impl PgCacheBackend {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let row = sqlx::query(
			"SELECT payload FROM retrieval_cache WHERE cache_key = $1 AND expires_at > $2",
		)
		.bind(key)
		.bind(OffsetDateTime::now_utc())
		.fetch_optional(&self.pool)
		.await?;
		let Some(row) = row else {
			return Ok(None);
		};

		Ok(Some(row.try_get("payload")?))
	}

	async fn store(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
		let now = OffsetDateTime::now_utc();
		let expires_at = now + ttl;

		sqlx::query(
			"\
INSERT INTO retrieval_cache (cache_key, payload, created_at, expires_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (cache_key) DO UPDATE SET
	payload = EXCLUDED.payload,
	created_at = EXCLUDED.created_at,
	expires_at = EXCLUDED.expires_at",
		)
		.bind(key)
		.bind(value)
		.bind(now)
		.bind(expires_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn remove(&self, pattern: &str) -> Result<u64> {
		let result = match pattern.strip_suffix('*') {
			Some(prefix) => {
				if prefix.is_empty() {
					return Err(Error::InvalidArgument(
						"Refusing to delete every cache entry without a prefix.".to_string(),
					));
				}

				sqlx::query("DELETE FROM retrieval_cache WHERE cache_key LIKE $1 ESCAPE '\\'")
					.bind(like_prefix(prefix))
					.execute(&self.pool)
					.await?
			},
			None => sqlx::query("DELETE FROM retrieval_cache WHERE cache_key = $1")
				.bind(pattern)
				.execute(&self.pool)
				.await?,
		};

		Ok(result.rows_affected())
	}

	/// Drops expired rows. Reads already skip them, so this only reclaims space.
	pub async fn purge_expired(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM retrieval_cache WHERE expires_at <= $1")
			.bind(OffsetDateTime::now_utc())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}
impl CacheBackend for PgCacheBackend {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheUnavailable>> {
		Box::pin(async move { self.fetch(key).await.map_err(CacheUnavailable::from) })
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a [u8],
		ttl: Duration,
	) -> BoxFuture<'a, Result<(), CacheUnavailable>> {
		Box::pin(async move { self.store(key, value, ttl).await.map_err(CacheUnavailable::from) })
	}

	fn delete<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<u64, CacheUnavailable>> {
		Box::pin(async move { self.remove(pattern).await.map_err(CacheUnavailable::from) })
	}
}

/// Escapes LIKE metacharacters in `prefix` and appends the wildcard.
fn like_prefix(prefix: &str) -> String {
	let mut out = String::with_capacity(prefix.len() + 1);

	for ch in prefix.chars() {
		if matches!(ch, '\\' | '%' | '_') {
			out.push('\\');
		}

		out.push(ch);
	}

	out.push('%');

	out
}

#[cfg(test)]
mod tests {
	use super::like_prefix;

	#[test]
	fn like_prefix_escapes_metacharacters() {
		assert_eq!(like_prefix("lexis:retrieval:"), "lexis:retrieval:%");
		assert_eq!(like_prefix("a_b%c\\"), "a\\_b\\%c\\\\%");
	}
}
