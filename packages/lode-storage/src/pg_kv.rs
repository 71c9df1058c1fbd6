use std::collections::HashMap;

use sqlx::PgPool;
use time::Duration;

use crate::{BoxFuture, Result, kv::KvStore};

/// [`KvStore`] shared by every dispatch process through Postgres.
///
/// Expiry is evaluated with the database clock so processes with skewed clocks agree on liveness.
#[derive(Clone)]
pub struct PgStore {
	pool: PgPool,
}
impl PgStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Deletes expired scalar entries and returns how many were removed.
	pub async fn purge_expired(&self) -> Result<u64> {
		let result = sqlx::query(
			"DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= now()",
		)
		.execute(&self.pool)
		.await?;

		tracing::info!(purged = result.rows_affected(), "Purged expired entries.");

		Ok(result.rows_affected())
	}
}
impl KvStore for PgStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(get(&self.pool, key))
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(set(&self.pool, key, value, ttl))
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(set_if_absent(&self.pool, key, value, ttl))
	}

	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(delete(&self.pool, key))
	}

	fn incr<'a>(&'a self, key: &'a str, ttl: Option<Duration>) -> BoxFuture<'a, Result<i64>> {
		Box::pin(incr(&self.pool, key, ttl))
	}

	fn hash_incr_by_float<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
		delta: f64,
	) -> BoxFuture<'a, Result<f64>> {
		Box::pin(hash_incr_by_float(&self.pool, key, field, delta))
	}

	fn hash_remove_if_non_positive<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(hash_remove_if_non_positive(&self.pool, key, field))
	}

	fn hash_get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HashMap<String, f64>>> {
		Box::pin(hash_get_all(&self.pool, key))
	}
}

async fn get(pool: &PgPool, key: &str) -> Result<Option<String>> {
	let value = sqlx::query_scalar::<_, String>(
		"\
SELECT value
FROM kv_entries
WHERE key = $1
	AND (expires_at IS NULL OR expires_at > now())",
	)
	.bind(key)
	.fetch_optional(pool)
	.await?;

	Ok(value)
}

async fn set(pool: &PgPool, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO kv_entries (key, value, expires_at)
VALUES ($1, $2, now() + make_interval(secs => $3))
ON CONFLICT (key) DO UPDATE
SET value = EXCLUDED.value,
	expires_at = EXCLUDED.expires_at",
	)
	.bind(key)
	.bind(value)
	.bind(ttl_secs(ttl))
	.execute(pool)
	.await?;

	Ok(())
}

async fn set_if_absent(
	pool: &PgPool,
	key: &str,
	value: &str,
	ttl: Option<Duration>,
) -> Result<bool> {
	let result = sqlx::query(
		"\
INSERT INTO kv_entries (key, value, expires_at)
VALUES ($1, $2, now() + make_interval(secs => $3))
ON CONFLICT (key) DO UPDATE
SET value = EXCLUDED.value,
	expires_at = EXCLUDED.expires_at
WHERE kv_entries.expires_at IS NOT NULL
	AND kv_entries.expires_at <= now()",
	)
	.bind(key)
	.bind(value)
	.bind(ttl_secs(ttl))
	.execute(pool)
	.await?;

	Ok(result.rows_affected() == 1)
}

async fn delete(pool: &PgPool, key: &str) -> Result<()> {
	let mut tx = pool.begin().await?;

	sqlx::query("DELETE FROM kv_entries WHERE key = $1").bind(key).execute(&mut *tx).await?;
	sqlx::query("DELETE FROM kv_hash_entries WHERE key = $1").bind(key).execute(&mut *tx).await?;

	tx.commit().await?;

	Ok(())
}

async fn incr(pool: &PgPool, key: &str, ttl: Option<Duration>) -> Result<i64> {
	let value = sqlx::query_scalar::<_, i64>(
		"\
INSERT INTO kv_entries (key, value, expires_at)
VALUES ($1, '1', now() + make_interval(secs => $2))
ON CONFLICT (key) DO UPDATE
SET value = CASE
		WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= now() THEN '1'
		ELSE (kv_entries.value::bigint + 1)::text
	END,
	expires_at = EXCLUDED.expires_at
RETURNING value::bigint",
	)
	.bind(key)
	.bind(ttl_secs(ttl))
	.fetch_one(pool)
	.await?;

	Ok(value)
}

async fn hash_incr_by_float(pool: &PgPool, key: &str, field: &str, delta: f64) -> Result<f64> {
	let value = sqlx::query_scalar::<_, f64>(
		"\
INSERT INTO kv_hash_entries (key, field, value)
VALUES ($1, $2, $3)
ON CONFLICT (key, field) DO UPDATE
SET value = kv_hash_entries.value + EXCLUDED.value
RETURNING value",
	)
	.bind(key)
	.bind(field)
	.bind(delta)
	.fetch_one(pool)
	.await?;

	Ok(value)
}

async fn hash_remove_if_non_positive(pool: &PgPool, key: &str, field: &str) -> Result<bool> {
	let result =
		sqlx::query("DELETE FROM kv_hash_entries WHERE key = $1 AND field = $2 AND value <= 0")
			.bind(key)
			.bind(field)
			.execute(pool)
			.await?;

	Ok(result.rows_affected() > 0)
}

async fn hash_get_all(pool: &PgPool, key: &str) -> Result<HashMap<String, f64>> {
	let rows: Vec<(String, f64)> =
		sqlx::query_as("SELECT field, value FROM kv_hash_entries WHERE key = $1")
			.bind(key)
			.fetch_all(pool)
			.await?;

	Ok(rows.into_iter().collect())
}

// `now() + make_interval(secs => NULL)` is NULL, which stores a non-expiring entry.
fn ttl_secs(ttl: Option<Duration>) -> Option<f64> {
	ttl.map(|ttl| ttl.as_seconds_f64())
}
