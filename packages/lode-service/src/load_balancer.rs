//! Least-loaded node choice over a shared per-node accumulator.
//!
//! One store hash exists per distinct node set. Loads are incremented before dispatch and
//! decremented after completion; a field at or below zero is deleted.

use std::{collections::BTreeMap, sync::Arc};

use lode_storage::{kv::KvStore, models::Node};
use tokio::runtime::Handle;

use crate::{Error, Result};

pub struct LoadBalancer {
	store: Arc<dyn KvStore>,
	key: String,
	nodes: Vec<Node>,
}
impl LoadBalancer {
	pub fn new(store: Arc<dyn KvStore>, namespace: &str, nodes: Vec<Node>) -> Result<Self> {
		if nodes.is_empty() {
			return Err(Error::invalid("load balancer requires at least one node."));
		}

		let key = format!("{namespace}:load_balancer:{}", node_set_key(&nodes));

		Ok(Self { store, key, nodes })
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn nodes(&self) -> &[Node] {
		&self.nodes
	}

	/// The node with the lowest load. Ties go to the earliest node in construction order.
	pub async fn pick(&self) -> Result<&Node> {
		Ok(self.pick_with_load().await?.0)
	}

	pub async fn pick_with_load(&self) -> Result<(&Node, f64)> {
		let picked = self.pick_where(|_| true).await?;

		Ok(picked.unwrap_or((&self.nodes[0], 0.0)))
	}

	/// Like [`LoadBalancer::pick_with_load`], restricted to nodes accepted by `eligible`.
	/// `None` when no node is eligible.
	pub async fn pick_where<P>(&self, eligible: P) -> Result<Option<(&Node, f64)>>
	where
		P: Fn(&Node) -> bool,
	{
		let loads = self.store.hash_get_all(&self.key).await?;
		let mut best: Option<(&Node, f64)> = None;

		for node in self.nodes.iter().filter(|node| eligible(node)) {
			let load = loads.get(&node.id.to_string()).copied().unwrap_or(0.0).max(0.0);

			if best.is_none_or(|(_, lowest)| load < lowest) {
				best = Some((node, load));
			}
		}

		Ok(best)
	}

	pub async fn increase_load(&self, node: &Node, weight: f64) -> Result<f64> {
		adjust_load(self.store.as_ref(), &self.key, node.id, weight).await
	}

	pub async fn decrease_load(&self, node: &Node, weight: f64) -> Result<f64> {
		adjust_load(self.store.as_ref(), &self.key, node.id, -weight).await
	}

	/// Current load of every node in the set. Nodes without an entry report zero.
	pub async fn distribution(&self) -> Result<BTreeMap<u64, f64>> {
		let loads = self.store.hash_get_all(&self.key).await?;

		Ok(self
			.nodes
			.iter()
			.map(|node| {
				(node.id, loads.get(&node.id.to_string()).copied().unwrap_or(0.0).max(0.0))
			})
			.collect())
	}

	pub async fn reset(&self) -> Result<()> {
		self.store.delete(&self.key).await?;

		tracing::info!(key = %self.key, "Load balancer reset.");

		Ok(())
	}

	/// Adds `weight` to the node and hands back a lease that removes it again.
	pub async fn acquire(&self, node: &Node, weight: f64) -> Result<LoadLease> {
		self.increase_load(node, weight).await?;

		Ok(LoadLease {
			store: self.store.clone(),
			key: self.key.clone(),
			node_id: node.id,
			weight,
			released: false,
		})
	}
}

/// Load added by [`LoadBalancer::acquire`].
///
/// Call [`LoadLease::release`] on completion. A lease dropped unreleased schedules the decrement
/// on the current tokio runtime.
pub struct LoadLease {
	store: Arc<dyn KvStore>,
	key: String,
	node_id: u64,
	weight: f64,
	released: bool,
}
impl LoadLease {
	pub fn node_id(&self) -> u64 {
		self.node_id
	}

	pub async fn release(mut self) -> Result<()> {
		self.released = true;

		adjust_load(self.store.as_ref(), &self.key, self.node_id, -self.weight).await?;

		Ok(())
	}
}
impl Drop for LoadLease {
	fn drop(&mut self) {
		if self.released {
			return;
		}

		let Ok(handle) = Handle::try_current() else {
			tracing::warn!(node_id = self.node_id, "Load lease dropped outside a runtime.");

			return;
		};
		let store = self.store.clone();
		let key = std::mem::take(&mut self.key);
		let node_id = self.node_id;
		let weight = self.weight;

		handle.spawn(async move {
			if let Err(err) = adjust_load(store.as_ref(), &key, node_id, -weight).await {
				tracing::warn!(node_id, error = %err, "Failed to release dropped load lease.");
			}
		});
	}
}

/// Store key component for a node set: the sorted ids joined by `-`.
pub fn node_set_key(nodes: &[Node]) -> String {
	let mut ids: Vec<u64> = nodes.iter().map(|node| node.id).collect();

	ids.sort_unstable();
	ids.dedup();

	ids.iter().map(u64::to_string).collect::<Vec<_>>().join("-")
}

async fn adjust_load(store: &dyn KvStore, key: &str, node_id: u64, delta: f64) -> Result<f64> {
	let field = node_id.to_string();
	let load = store.hash_incr_by_float(key, &field, delta).await?;

	// Conditional delete: a concurrent increment that lands first keeps the field alive.
	if load <= 0.0 {
		store.hash_remove_if_non_positive(key, &field).await?;
	}

	Ok(load.max(0.0))
}
