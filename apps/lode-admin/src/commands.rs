use color_eyre::eyre;
use serde_json::{Value, json};
use time::OffsetDateTime;

use lode_config::Config;
use lode_service::{Dispatcher, load_balancer::LoadBalancer};
use lode_storage::{models::Node, pg_kv::PgStore};

use crate::{BackoffAction, Command, Stores};

/// Runs one command and returns its report.
pub async fn execute(cfg: &Config, stores: &Stores, command: Command) -> color_eyre::Result<Value> {
	let dispatcher = Dispatcher::new(cfg, stores.kv.clone(), stores.topology.clone());
	let now = OffsetDateTime::now_utc();

	match command {
		Command::Schema => {
			stores.db()?.ensure_schema().await?;

			tracing::info!("Schema applied.");

			Ok(json!({ "schema": "applied" }))
		},
		Command::Nodes => {
			let mut nodes = Vec::new();

			for node in dispatcher.online_nodes(now).await? {
				let backoff = dispatcher.node_backoff(node.id);

				nodes.push(json!({
					"id": node.id,
					"endpoint": node.endpoint,
					"last_seen_at": node.last_seen_at.unix_timestamp(),
					"backed_off": backoff.enabled(now).await?,
				}));
			}

			Ok(json!({ "nodes": nodes }))
		},
		Command::Select { level, namespace } => {
			let nodes = dispatcher.select_nodes(level, namespace, now).await?;

			Ok(json!({
				"level": level.as_str(),
				"nodes": nodes.iter().map(|node| node.id).collect::<Vec<_>>(),
			}))
		},
		Command::Load { nodes } => {
			let balancer = balancer(&dispatcher, &nodes).await?;
			let loads: serde_json::Map<String, Value> = balancer
				.distribution()
				.await?
				.into_iter()
				.map(|(node_id, load)| (node_id.to_string(), json!(load)))
				.collect();

			Ok(json!({ "key": balancer.key(), "loads": loads }))
		},
		Command::ResetLoad { nodes } => {
			let balancer = balancer(&dispatcher, &nodes).await?;

			balancer.reset().await?;

			Ok(json!({ "key": balancer.key(), "reset": true }))
		},
		Command::Backoff { action: BackoffAction::Show { node } } => {
			let backoff = dispatcher.node_backoff(node);

			Ok(json!({
				"node": node,
				"backed_off": backoff.enabled(now).await?,
				"failures": backoff.failures().await?,
				"seconds_remaining": backoff.seconds_remaining(now).await?,
				"expires_at": backoff.expires_at().await?.map(|at| at.unix_timestamp()),
			}))
		},
		Command::Backoff { action: BackoffAction::Clear { node } } => {
			dispatcher.node_backoff(node).remove_backoff().await?;

			Ok(json!({ "node": node, "cleared": true }))
		},
		Command::PurgeExpired => {
			let purged = PgStore::new(stores.db()?.pool.clone()).purge_expired().await?;

			tracing::info!(purged, "Expired key-value rows purged.");

			Ok(json!({ "purged": purged }))
		},
	}
}

async fn balancer(dispatcher: &Dispatcher, node_ids: &[u64]) -> color_eyre::Result<LoadBalancer> {
	let nodes: Vec<Node> = dispatcher.topology().nodes_by_ids(node_ids).await?;
	let missing: Vec<u64> =
		node_ids.iter().copied().filter(|id| !nodes.iter().any(|node| node.id == *id)).collect();

	if !missing.is_empty() {
		return Err(eyre::eyre!("Unknown node ids: {missing:?}."));
	}

	Ok(dispatcher.load_balancer(nodes)?)
}
