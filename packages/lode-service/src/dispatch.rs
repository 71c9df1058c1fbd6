use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use lode_config::Config;
use lode_storage::{kv::KvStore, models::Node, topology::TopologyStore};

use crate::{Result, backoff::NodeBackoff, load_balancer::LoadBalancer};

/// Shared handles for node dispatch: the key-value store, the topology and their settings.
#[derive(Clone)]
pub struct Dispatcher {
	store: Arc<dyn KvStore>,
	topology: Arc<dyn TopologyStore>,
	namespace: String,
	settings: lode_config::Dispatch,
	online_threshold: Duration,
}
impl Dispatcher {
	pub fn new(cfg: &Config, store: Arc<dyn KvStore>, topology: Arc<dyn TopologyStore>) -> Self {
		let online_threshold = Duration::seconds(
			i64::try_from(cfg.topology.online_threshold_secs).unwrap_or(i64::MAX),
		);

		Self {
			store,
			topology,
			namespace: cfg.storage.kv.namespace.clone(),
			settings: cfg.dispatch.clone(),
			online_threshold,
		}
	}

	pub fn store(&self) -> &Arc<dyn KvStore> {
		&self.store
	}

	pub fn topology(&self) -> &dyn TopologyStore {
		self.topology.as_ref()
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn settings(&self) -> &lode_config::Dispatch {
		&self.settings
	}

	pub fn is_online(&self, node: &Node, now: OffsetDateTime) -> bool {
		node.is_online(now, self.online_threshold)
	}

	pub async fn online_nodes(&self, now: OffsetDateTime) -> Result<Vec<Node>> {
		Ok(self.topology.online_nodes(now - self.online_threshold).await?)
	}

	pub fn load_balancer(&self, nodes: Vec<Node>) -> Result<LoadBalancer> {
		LoadBalancer::new(self.store.clone(), &self.namespace, nodes)
	}

	pub fn node_backoff(&self, node_id: u64) -> NodeBackoff {
		NodeBackoff::new(self.store.clone(), &self.namespace, node_id, &self.settings)
	}
}
