//! Per-node failure backoff with exponential growth and bounded jitter.

use std::sync::{Arc, Mutex};

use rand::Rng;
use time::{Duration, OffsetDateTime};

use lode_storage::kv::KvStore;

use crate::{Error, Result};

pub struct NodeBackoff {
	store: Arc<dyn KvStore>,
	node_id: u64,
	failures_key: String,
	expires_at_key: String,
	max_backoff_secs: f64,
	max_jitter_ms: u64,
	cached_expiry: Mutex<Option<OffsetDateTime>>,
}
impl NodeBackoff {
	pub fn new(
		store: Arc<dyn KvStore>,
		namespace: &str,
		node_id: u64,
		settings: &lode_config::Dispatch,
	) -> Self {
		let prefix = format!("{namespace}:node_backoff:{node_id}");

		Self {
			store,
			node_id,
			failures_key: format!("{prefix}:failures"),
			expires_at_key: format!("{prefix}:expires_at"),
			max_backoff_secs: settings.max_backoff_secs as f64,
			max_jitter_ms: settings.max_jitter_ms,
			cached_expiry: Mutex::new(None),
		}
	}

	pub fn node_id(&self) -> u64 {
		self.node_id
	}

	/// Records one more failure and returns the new expiry.
	pub async fn backoff(&self, now: OffsetDateTime) -> Result<OffsetDateTime> {
		// The counter outlives the longest window so the next failure keeps growing it.
		let counter_ttl = Duration::seconds_f64(self.max_backoff_secs * 2.0);
		let failures = self.store.incr(&self.failures_key, Some(counter_ttl)).await?;
		let jitter_ms = match self.max_jitter_ms {
			0 => 0,
			max => rand::thread_rng().gen_range(0..max),
		};
		let seconds = expires_in_secs(failures, jitter_ms as f64 / 1_000.0, self.max_backoff_secs);
		let window = Duration::seconds_f64(seconds);
		let expires_at = now + window;

		self.store
			.set(&self.expires_at_key, &expires_at.unix_timestamp_nanos().to_string(), Some(window))
			.await?;
		self.set_cached(Some(expires_at));

		tracing::warn!(node_id = self.node_id, failures, seconds, "Node backed off.");

		Ok(expires_at)
	}

	/// Whether the node is inside a backoff window at `now`.
	///
	/// A cached expiry in the future answers directly. Otherwise the shared state is reloaded,
	/// since another process may have extended the window.
	pub async fn enabled(&self, now: OffsetDateTime) -> Result<bool> {
		if self.cached().is_some_and(|expires_at| now < expires_at) {
			return Ok(true);
		}

		let expires_at = self.expires_at().await?;

		self.set_cached(expires_at);

		Ok(expires_at.is_some_and(|expires_at| now < expires_at))
	}

	pub async fn remove_backoff(&self) -> Result<()> {
		self.store.delete(&self.failures_key).await?;
		self.store.delete(&self.expires_at_key).await?;
		self.set_cached(None);

		tracing::info!(node_id = self.node_id, "Node backoff cleared.");

		Ok(())
	}

	pub async fn expires_at(&self) -> Result<Option<OffsetDateTime>> {
		let Some(raw) = self.store.get(&self.expires_at_key).await? else {
			return Ok(None);
		};
		let nanos = raw.parse::<i128>().map_err(|_| Error::Storage {
			message: format!("Backoff expiry for node {} is not a timestamp.", self.node_id),
		})?;
		let expires_at = OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|err| {
			Error::Storage { message: format!("Backoff expiry for node {}: {err}.", self.node_id) }
		})?;

		Ok(Some(expires_at))
	}

	/// Whole seconds left in the window, rounded up. Zero when not backed off.
	pub async fn seconds_remaining(&self, now: OffsetDateTime) -> Result<i64> {
		let remaining = match self.expires_at().await? {
			Some(expires_at) if expires_at > now => (expires_at - now).as_seconds_f64().ceil() as i64,
			_ => 0,
		};

		Ok(remaining)
	}

	pub async fn failures(&self) -> Result<i64> {
		let Some(raw) = self.store.get(&self.failures_key).await? else {
			return Ok(0);
		};

		raw.parse().map_err(|_| Error::Storage {
			message: format!("Backoff counter for node {} is not an integer.", self.node_id),
		})
	}

	fn cached(&self) -> Option<OffsetDateTime> {
		*self.cached_expiry.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn set_cached(&self, expires_at: Option<OffsetDateTime>) {
		*self.cached_expiry.lock().unwrap_or_else(|err| err.into_inner()) = expires_at;
	}
}

/// Backoff window in seconds after `failures` consecutive failures: `2^failures + jitter`,
/// capped at `max_secs`.
pub fn expires_in_secs(failures: i64, jitter_secs: f64, max_secs: f64) -> f64 {
	let exponent = failures.clamp(0, 63) as i32;

	(2_f64.powi(exponent) + jitter_secs).min(max_secs)
}
