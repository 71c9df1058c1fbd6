use std::{fmt, str::FromStr};

use time::{Duration, OffsetDateTime};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
	pub id: u64,
	pub endpoint: String,
	pub last_seen_at: OffsetDateTime,
}
impl Node {
	/// A node is online while its last heartbeat is no older than `threshold`.
	pub fn is_online(&self, now: OffsetDateTime, threshold: Duration) -> bool {
		self.last_seen_at >= now - threshold
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaState {
	Pending,
	Ready,
	Other,
}
impl ReplicaState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Ready => "ready",
			Self::Other => "other",
		}
	}
}
impl FromStr for ReplicaState {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"pending" => Ok(Self::Pending),
			"ready" => Ok(Self::Ready),
			"other" => Ok(Self::Other),
			other => Err(Error::Corrupt(format!("unknown replica state '{other}'."))),
		}
	}
}
impl fmt::Display for ReplicaState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
	pub id: u64,
	pub enabled_namespace_id: u64,
	pub state: ReplicaState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledNamespace {
	pub id: u64,
	pub root_namespace_id: u64,
}
