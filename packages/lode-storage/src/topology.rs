//! Read access to the index topology: nodes, enabled namespaces and their replicas.

use std::{collections::HashMap, sync::RwLock};

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::{
	BoxFuture, Result, from_db_id,
	models::{EnabledNamespace, Node, Replica, ReplicaState},
	to_db_id,
};

pub trait TopologyStore
where
	Self: Send + Sync,
{
	/// Nodes whose last heartbeat is at or after `seen_after`, ordered by id.
	fn online_nodes<'a>(&'a self, seen_after: OffsetDateTime) -> BoxFuture<'a, Result<Vec<Node>>>;

	fn nodes_by_ids<'a>(&'a self, node_ids: &'a [u64]) -> BoxFuture<'a, Result<Vec<Node>>>;

	fn enabled_namespace<'a>(
		&'a self,
		root_namespace_id: u64,
	) -> BoxFuture<'a, Result<Option<EnabledNamespace>>>;

	/// Ready replicas of the namespace, ordered by id.
	fn ready_replicas<'a>(
		&'a self,
		enabled_namespace_id: u64,
	) -> BoxFuture<'a, Result<Vec<Replica>>>;

	/// Hosting nodes for each replica in one round trip, each list ordered by node id.
	fn replica_nodes<'a>(
		&'a self,
		replica_ids: &'a [u64],
	) -> BoxFuture<'a, Result<HashMap<u64, Vec<Node>>>>;
}

#[derive(Debug, Default)]
struct MemoryTopologyState {
	nodes: Vec<Node>,
	namespaces: Vec<EnabledNamespace>,
	replicas: Vec<Replica>,
	assignments: Vec<(u64, u64)>,
}

/// In-process [`TopologyStore`] populated by the caller.
#[derive(Debug, Default)]
pub struct MemoryTopology {
	state: RwLock<MemoryTopologyState>,
}
impl MemoryTopology {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces a node by id.
	pub fn upsert_node(&self, node: Node) {
		let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());

		state.nodes.retain(|existing| existing.id != node.id);
		state.nodes.push(node);
		state.nodes.sort_by_key(|node| node.id);
	}

	pub fn enable_namespace(&self, namespace: EnabledNamespace) {
		let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());

		state.namespaces.retain(|existing| existing.id != namespace.id);
		state.namespaces.push(namespace);
	}

	/// Inserts or replaces a replica and assigns it to `node_ids`.
	pub fn upsert_replica(&self, replica: Replica, node_ids: &[u64]) {
		let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());

		state.replicas.retain(|existing| existing.id != replica.id);
		state.assignments.retain(|(replica_id, _)| *replica_id != replica.id);
		state.assignments.extend(node_ids.iter().map(|node_id| (replica.id, *node_id)));
		state.replicas.push(replica);
		state.replicas.sort_by_key(|replica| replica.id);
	}

	/// Moves a node's heartbeat, e.g. to take it offline.
	pub fn touch_node(&self, node_id: u64, last_seen_at: OffsetDateTime) {
		let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());

		if let Some(node) = state.nodes.iter_mut().find(|node| node.id == node_id) {
			node.last_seen_at = last_seen_at;
		}
	}

	fn read<T>(&self, f: impl FnOnce(&MemoryTopologyState) -> T) -> T {
		let state = self.state.read().unwrap_or_else(|err| err.into_inner());

		f(&state)
	}
}
impl TopologyStore for MemoryTopology {
	fn online_nodes<'a>(&'a self, seen_after: OffsetDateTime) -> BoxFuture<'a, Result<Vec<Node>>> {
		let nodes: Vec<Node> = self.read(|state| {
			state.nodes.iter().filter(|node| node.last_seen_at >= seen_after).cloned().collect()
		});

		Box::pin(async move { Ok(nodes) })
	}

	fn nodes_by_ids<'a>(&'a self, node_ids: &'a [u64]) -> BoxFuture<'a, Result<Vec<Node>>> {
		let nodes: Vec<Node> = self.read(|state| {
			state.nodes.iter().filter(|node| node_ids.contains(&node.id)).cloned().collect()
		});

		Box::pin(async move { Ok(nodes) })
	}

	fn enabled_namespace<'a>(
		&'a self,
		root_namespace_id: u64,
	) -> BoxFuture<'a, Result<Option<EnabledNamespace>>> {
		let namespace = self.read(|state| {
			state
				.namespaces
				.iter()
				.find(|namespace| namespace.root_namespace_id == root_namespace_id)
				.copied()
		});

		Box::pin(async move { Ok(namespace) })
	}

	fn ready_replicas<'a>(
		&'a self,
		enabled_namespace_id: u64,
	) -> BoxFuture<'a, Result<Vec<Replica>>> {
		let replicas: Vec<Replica> = self.read(|state| {
			state
				.replicas
				.iter()
				.filter(|replica| {
					replica.enabled_namespace_id == enabled_namespace_id
						&& replica.state == ReplicaState::Ready
				})
				.cloned()
				.collect()
		});

		Box::pin(async move { Ok(replicas) })
	}

	fn replica_nodes<'a>(
		&'a self,
		replica_ids: &'a [u64],
	) -> BoxFuture<'a, Result<HashMap<u64, Vec<Node>>>> {
		let grouped = self.read(|state| {
			let mut grouped: HashMap<u64, Vec<Node>> = HashMap::new();

			for (replica_id, node_id) in &state.assignments {
				if !replica_ids.contains(replica_id) {
					continue;
				}
				if let Some(node) = state.nodes.iter().find(|node| node.id == *node_id) {
					grouped.entry(*replica_id).or_default().push(node.clone());
				}
			}
			for nodes in grouped.values_mut() {
				nodes.sort_by_key(|node| node.id);
			}

			grouped
		});

		Box::pin(async move { Ok(grouped) })
	}
}

#[derive(sqlx::FromRow)]
struct NodeRow {
	node_id: i64,
	endpoint: String,
	last_seen_at: OffsetDateTime,
}
impl NodeRow {
	fn into_node(self) -> Result<Node> {
		Ok(Node {
			id: from_db_id(self.node_id)?,
			endpoint: self.endpoint,
			last_seen_at: self.last_seen_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct ReplicaRow {
	replica_id: i64,
	enabled_namespace_id: i64,
	state: String,
}

#[derive(sqlx::FromRow)]
struct ReplicaNodeRow {
	replica_id: i64,
	#[sqlx(flatten)]
	node: NodeRow,
}

#[derive(Clone)]
pub struct PgTopology {
	pool: PgPool,
}
impl PgTopology {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl TopologyStore for PgTopology {
	fn online_nodes<'a>(&'a self, seen_after: OffsetDateTime) -> BoxFuture<'a, Result<Vec<Node>>> {
		Box::pin(online_nodes(&self.pool, seen_after))
	}

	fn nodes_by_ids<'a>(&'a self, node_ids: &'a [u64]) -> BoxFuture<'a, Result<Vec<Node>>> {
		Box::pin(nodes_by_ids(&self.pool, node_ids))
	}

	fn enabled_namespace<'a>(
		&'a self,
		root_namespace_id: u64,
	) -> BoxFuture<'a, Result<Option<EnabledNamespace>>> {
		Box::pin(enabled_namespace(&self.pool, root_namespace_id))
	}

	fn ready_replicas<'a>(
		&'a self,
		enabled_namespace_id: u64,
	) -> BoxFuture<'a, Result<Vec<Replica>>> {
		Box::pin(ready_replicas(&self.pool, enabled_namespace_id))
	}

	fn replica_nodes<'a>(
		&'a self,
		replica_ids: &'a [u64],
	) -> BoxFuture<'a, Result<HashMap<u64, Vec<Node>>>> {
		Box::pin(replica_nodes(&self.pool, replica_ids))
	}
}

async fn online_nodes(pool: &PgPool, seen_after: OffsetDateTime) -> Result<Vec<Node>> {
	let rows: Vec<NodeRow> = sqlx::query_as(
		"\
SELECT node_id, endpoint, last_seen_at
FROM search_nodes
WHERE last_seen_at >= $1
ORDER BY node_id",
	)
	.bind(seen_after)
	.fetch_all(pool)
	.await?;

	rows.into_iter().map(NodeRow::into_node).collect::<Result<Vec<_>>>()
}

async fn nodes_by_ids(pool: &PgPool, node_ids: &[u64]) -> Result<Vec<Node>> {
	let ids = node_ids.iter().map(|id| to_db_id(*id)).collect::<Result<Vec<_>>>()?;
	let rows: Vec<NodeRow> = sqlx::query_as(
		"\
SELECT node_id, endpoint, last_seen_at
FROM search_nodes
WHERE node_id = ANY($1)
ORDER BY node_id",
	)
	.bind(ids)
	.fetch_all(pool)
	.await?;

	rows.into_iter().map(NodeRow::into_node).collect::<Result<Vec<_>>>()
}

async fn enabled_namespace(
	pool: &PgPool,
	root_namespace_id: u64,
) -> Result<Option<EnabledNamespace>> {
	let row: Option<(i64, i64)> = sqlx::query_as(
		"\
SELECT enabled_namespace_id, root_namespace_id
FROM enabled_namespaces
WHERE root_namespace_id = $1",
	)
	.bind(to_db_id(root_namespace_id)?)
	.fetch_optional(pool)
	.await?;
	let Some((id, root_namespace_id)) = row else {
		return Ok(None);
	};

	Ok(Some(EnabledNamespace {
		id: from_db_id(id)?,
		root_namespace_id: from_db_id(root_namespace_id)?,
	}))
}

async fn ready_replicas(pool: &PgPool, enabled_namespace_id: u64) -> Result<Vec<Replica>> {
	let rows: Vec<ReplicaRow> = sqlx::query_as(
		"\
SELECT replica_id, enabled_namespace_id, state
FROM search_replicas
WHERE enabled_namespace_id = $1
	AND state = $2
ORDER BY replica_id",
	)
	.bind(to_db_id(enabled_namespace_id)?)
	.bind(ReplicaState::Ready.as_str())
	.fetch_all(pool)
	.await?;
	let mut replicas = Vec::with_capacity(rows.len());

	for row in rows {
		replicas.push(Replica {
			id: from_db_id(row.replica_id)?,
			enabled_namespace_id: from_db_id(row.enabled_namespace_id)?,
			state: row.state.parse()?,
		});
	}

	Ok(replicas)
}

async fn replica_nodes(pool: &PgPool, replica_ids: &[u64]) -> Result<HashMap<u64, Vec<Node>>> {
	let ids = replica_ids.iter().map(|id| to_db_id(*id)).collect::<Result<Vec<_>>>()?;
	let rows: Vec<ReplicaNodeRow> = sqlx::query_as(
		"\
SELECT rn.replica_id, n.node_id, n.endpoint, n.last_seen_at
FROM search_replica_nodes rn
JOIN search_nodes n ON n.node_id = rn.node_id
WHERE rn.replica_id = ANY($1)
ORDER BY rn.replica_id, n.node_id",
	)
	.bind(ids)
	.fetch_all(pool)
	.await?;
	let mut grouped: HashMap<u64, Vec<Node>> = HashMap::new();

	for row in rows {
		let replica_id = from_db_id(row.replica_id)?;

		grouped.entry(replica_id).or_default().push(row.node.into_node()?);
	}

	Ok(grouped)
}
