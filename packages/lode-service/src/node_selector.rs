//! Sticky node selection.
//!
//! Project and group searches reuse the node set chosen for their enabled namespace until the
//! entry expires or one of its nodes goes offline. A stale entry is recomputed, never narrowed.

use time::{Duration, OffsetDateTime};

use lode_domain::query::SearchLevel;
use lode_storage::models::{EnabledNamespace, Node};

use crate::{Dispatcher, Error, Result, replica_selector::ReplicaSelection};

impl Dispatcher {
	/// Nodes to query at `level`. `root_namespace_id` is required below global level.
	pub async fn select_nodes(
		&self,
		level: SearchLevel,
		root_namespace_id: Option<u64>,
		now: OffsetDateTime,
	) -> Result<Vec<Node>> {
		if level == SearchLevel::Global {
			let nodes = self.online_nodes(now).await?;

			if nodes.is_empty() {
				return Err(Error::invalid("no online nodes found."));
			}

			return Ok(nodes);
		}

		let root_namespace_id = root_namespace_id
			.ok_or_else(|| Error::invalid(format!("{level} search requires a namespace.")))?;
		let namespace =
			self.topology().enabled_namespace(root_namespace_id).await?.ok_or_else(|| {
				Error::invalid(format!(
					"no enabled namespace found for namespace {root_namespace_id}."
				))
			})?;
		let key = selection_key(self.namespace(), namespace.id, level);

		if let Some(nodes) = self.cached_selection(&key, now).await? {
			return Ok(nodes);
		}

		self.refresh_selection(&key, &namespace, now).await
	}

	async fn cached_selection(&self, key: &str, now: OffsetDateTime) -> Result<Option<Vec<Node>>> {
		let Some(raw) = self.store().get(key).await? else {
			return Ok(None);
		};
		let Some(node_ids) = parse_node_ids(&raw) else {
			tracing::warn!(key, "Discarding unreadable node selection.");

			return Ok(None);
		};
		let found = self.topology().nodes_by_ids(&node_ids).await?;
		let mut nodes = Vec::with_capacity(node_ids.len());

		for node_id in &node_ids {
			match found.iter().find(|node| node.id == *node_id) {
				Some(node) if self.is_online(node, now) => nodes.push(node.clone()),
				_ => {
					tracing::debug!(key, node_id, "Cached node selection is stale.");

					return Ok(None);
				},
			}
		}

		Ok(Some(nodes))
	}

	async fn refresh_selection(
		&self,
		key: &str,
		namespace: &EnabledNamespace,
		now: OffsetDateTime,
	) -> Result<Vec<Node>> {
		let ReplicaSelection::Present { replica, nodes } =
			self.select_replica(namespace, now).await?
		else {
			return Err(Error::invalid(format!(
				"no ready replica with online nodes for enabled namespace {}.",
				namespace.id
			)));
		};
		let value = nodes.iter().map(|node| node.id.to_string()).collect::<Vec<_>>().join(",");
		let ttl = Duration::seconds(
			i64::try_from(self.settings().selection_ttl_secs).unwrap_or(i64::MAX),
		);

		// Concurrent refreshes may both write; either answer is a valid selection.
		self.store().set(key, &value, Some(ttl)).await?;

		tracing::info!(key, replica_id = replica.id, nodes = %value, "Node selection refreshed.");

		Ok(nodes)
	}
}

pub fn selection_key(namespace: &str, enabled_namespace_id: u64, level: SearchLevel) -> String {
	format!("{namespace}:node_selection:{enabled_namespace_id}:{level}")
}

fn parse_node_ids(raw: &str) -> Option<Vec<u64>> {
	let ids = raw.split(',').map(|id| id.trim().parse::<u64>().ok()).collect::<Option<Vec<_>>>()?;

	if ids.is_empty() { None } else { Some(ids) }
}
