//! Shared expiring key-value state.
//!
//! Every counter, accumulator and cache the dispatch layer keeps lives behind [`KvStore`]. Each
//! mutating call is one atomic read-modify-write, so concurrent processes sharing a store never
//! lose an increment.

use std::{collections::HashMap, sync::Mutex};

use ahash::AHashMap;
use time::{Duration, OffsetDateTime};

use crate::{BoxFuture, Error, Result};

pub trait KvStore
where
	Self: Send + Sync,
{
	/// Returns the live value stored at `key`.
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

	/// Stores `value` at `key`, replacing any previous value and expiry.
	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<()>>;

	/// Stores `value` only when `key` holds no live value. Returns whether it was written.
	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<bool>>;

	/// Removes the scalar value and every hash field stored at `key`.
	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Increments the integer counter at `key` and returns the new value.
	///
	/// An absent or expired counter restarts at 1. The expiry is replaced with `ttl` on every call.
	fn incr<'a>(&'a self, key: &'a str, ttl: Option<Duration>) -> BoxFuture<'a, Result<i64>>;

	/// Adds `delta` to a hash field and returns the new value.
	fn hash_incr_by_float<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
		delta: f64,
	) -> BoxFuture<'a, Result<f64>>;

	/// Removes a hash field only if its current value is zero or below.
	fn hash_remove_if_non_positive<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
	) -> BoxFuture<'a, Result<bool>>;

	fn hash_get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HashMap<String, f64>>>;
}

#[derive(Debug)]
struct MemoryEntry {
	value: String,
	expires_at: Option<OffsetDateTime>,
}
impl MemoryEntry {
	fn is_live(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|expires_at| expires_at > now)
	}
}

#[derive(Debug, Default)]
struct MemoryState {
	entries: AHashMap<String, MemoryEntry>,
	hashes: AHashMap<String, AHashMap<String, f64>>,
}
impl MemoryState {
	fn live_entry(&mut self, key: &str, now: OffsetDateTime) -> Option<&mut MemoryEntry> {
		if self.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
			self.entries.remove(key);
		}

		self.entries.get_mut(key)
	}
}

/// Process-local [`KvStore`] for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
	state: Mutex<MemoryState>,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState, OffsetDateTime) -> T) -> T {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		f(&mut state, OffsetDateTime::now_utc())
	}
}
impl KvStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
		let value =
			self.with_state(|state, now| state.live_entry(key, now).map(|entry| entry.value.clone()));

		Box::pin(async move { Ok(value) })
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state, now| {
			state.entries.insert(
				key.to_string(),
				MemoryEntry { value: value.to_string(), expires_at: ttl.map(|ttl| now + ttl) },
			);
		});

		Box::pin(async { Ok(()) })
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		ttl: Option<Duration>,
	) -> BoxFuture<'a, Result<bool>> {
		let written = self.with_state(|state, now| {
			if state.live_entry(key, now).is_some() {
				return false;
			}

			state.entries.insert(
				key.to_string(),
				MemoryEntry { value: value.to_string(), expires_at: ttl.map(|ttl| now + ttl) },
			);

			true
		});

		Box::pin(async move { Ok(written) })
	}

	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state, _| {
			state.entries.remove(key);
			state.hashes.remove(key);
		});

		Box::pin(async { Ok(()) })
	}

	fn incr<'a>(&'a self, key: &'a str, ttl: Option<Duration>) -> BoxFuture<'a, Result<i64>> {
		let result: Result<i64> = self.with_state(|state, now| {
			let expires_at = ttl.map(|ttl| now + ttl);
			let Some(entry) = state.live_entry(key, now) else {
				state
					.entries
					.insert(key.to_string(), MemoryEntry { value: "1".to_string(), expires_at });

				return Ok(1);
			};
			let current = entry.value.parse::<i64>().map_err(|_| {
				Error::Corrupt(format!("value at {key} is not an integer counter."))
			})?;
			let next = current.saturating_add(1);

			entry.value = next.to_string();
			entry.expires_at = expires_at;

			Ok(next)
		});

		Box::pin(async move { result })
	}

	fn hash_incr_by_float<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
		delta: f64,
	) -> BoxFuture<'a, Result<f64>> {
		let value = self.with_state(|state, _| {
			let slot = state
				.hashes
				.entry(key.to_string())
				.or_default()
				.entry(field.to_string())
				.or_insert(0.0);

			*slot += delta;

			*slot
		});

		Box::pin(async move { Ok(value) })
	}

	fn hash_remove_if_non_positive<'a>(
		&'a self,
		key: &'a str,
		field: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		let removed = self.with_state(|state, _| {
			let Some(fields) = state.hashes.get_mut(key) else {
				return false;
			};

			if fields.get(field).is_none_or(|value| *value > 0.0) {
				return false;
			}

			fields.remove(field);

			if fields.is_empty() {
				state.hashes.remove(key);
			}

			true
		});

		Box::pin(async move { Ok(removed) })
	}

	fn hash_get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HashMap<String, f64>>> {
		let fields: HashMap<String, f64> = self.with_state(|state, _| {
			state
				.hashes
				.get(key)
				.map(|fields| {
					fields.iter().map(|(field, value)| (field.clone(), *value)).collect()
				})
				.unwrap_or_default()
		});

		Box::pin(async move { Ok(fields) })
	}
}
