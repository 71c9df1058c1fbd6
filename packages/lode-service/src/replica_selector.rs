use time::OffsetDateTime;

use lode_storage::models::{EnabledNamespace, Node, Replica};

use crate::{Dispatcher, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaSelection {
	Present { replica: Replica, nodes: Vec<Node> },
	Empty,
}

impl Dispatcher {
	/// Picks the ready replica whose least-loaded online node carries the lowest load.
	///
	/// Replica-to-node assignments are loaded in one batch. Replicas without online nodes are
	/// skipped. Loads are read from the accumulator of the replica's online node set, and
	/// backed-off nodes do not count while another online node of that replica remains. Equal
	/// loads resolve to the lowest replica id.
	pub async fn select_replica(
		&self,
		namespace: &EnabledNamespace,
		now: OffsetDateTime,
	) -> Result<ReplicaSelection> {
		let mut replicas = self.topology().ready_replicas(namespace.id).await?;

		if replicas.is_empty() {
			return Ok(ReplicaSelection::Empty);
		}

		replicas.sort_by_key(|replica| replica.id);

		let replica_ids: Vec<u64> = replicas.iter().map(|replica| replica.id).collect();
		let mut assignments = self.topology().replica_nodes(&replica_ids).await?;
		let mut best: Option<(f64, Replica, Vec<Node>)> = None;

		for replica in replicas {
			let online: Vec<Node> = assignments
				.remove(&replica.id)
				.unwrap_or_default()
				.into_iter()
				.filter(|node| self.is_online(node, now))
				.collect();

			if online.is_empty() {
				tracing::debug!(replica_id = replica.id, "Replica has no online nodes.");

				continue;
			}

			let candidates = self.candidate_nodes(&online, now).await?;
			let loads = self.load_balancer(online.clone())?.distribution().await?;
			let load = candidates
				.iter()
				.map(|node| loads.get(&node.id).copied().unwrap_or(0.0))
				.fold(f64::INFINITY, f64::min);

			if best.as_ref().is_none_or(|(best_load, _, _)| load < *best_load) {
				best = Some((load, replica, online));
			}
		}

		let Some((load, replica, nodes)) = best else {
			return Ok(ReplicaSelection::Empty);
		};

		tracing::debug!(
			enabled_namespace_id = namespace.id,
			replica_id = replica.id,
			load,
			nodes = nodes.len(),
			"Selected replica."
		);

		Ok(ReplicaSelection::Present { replica, nodes })
	}

	async fn candidate_nodes(&self, online: &[Node], now: OffsetDateTime) -> Result<Vec<Node>> {
		let mut available = Vec::with_capacity(online.len());

		for node in online {
			if !self.node_backoff(node.id).enabled(now).await? {
				available.push(node.clone());
			}
		}

		if available.is_empty() {
			return Ok(online.to_vec());
		}

		Ok(available)
	}
}
