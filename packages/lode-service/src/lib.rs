pub mod access;
pub mod backoff;
pub mod cache;
pub mod dispatch;
pub mod load_balancer;
pub mod node_selector;
pub mod replica_selector;
pub mod request;
pub mod results;

mod error;

pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use lode_storage::BoxFuture;
pub use request::{ForwardTarget, SearchRequest};
pub use results::{SearchParams, SearchResults, SearchState};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cache::ResultCache;
use lode_config::Config;
use lode_domain::access::AccessLevel;
use lode_storage::{kv::KvStore, models::Node, topology::TopologyStore};

/// Membership facts about an actor. Answers are read-only snapshots.
pub trait AuthorizationProvider
where
	Self: Send + Sync,
{
	fn can_bypass<'a>(&'a self, actor_id: u64) -> BoxFuture<'a, Result<bool>>;

	/// Projects where the actor holds at least `min_level`.
	fn project_ids_at<'a>(
		&'a self,
		actor_id: u64,
		min_level: AccessLevel,
	) -> BoxFuture<'a, Result<Vec<u64>>>;

	/// Formatted traversal prefixes of groups where the actor holds at least `min_level`.
	fn group_prefixes_at<'a>(
		&'a self,
		actor_id: u64,
		min_level: AccessLevel,
	) -> BoxFuture<'a, Result<Vec<String>>>;

	fn custom_role_project_ids<'a>(&'a self, actor_id: u64) -> BoxFuture<'a, Result<Vec<u64>>>;

	fn custom_role_group_prefixes<'a>(
		&'a self,
		actor_id: u64,
	) -> BoxFuture<'a, Result<Vec<String>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
	pub id: u64,
	pub root_namespace_id: u64,
	pub archived: bool,
	pub forked: bool,
	pub pending_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	pub id: u64,
	pub root_namespace_id: u64,
	/// Ancestry from the root group down to this group.
	pub traversal_ids: Vec<u64>,
}

pub trait Catalog
where
	Self: Send + Sync,
{
	fn project<'a>(&'a self, project_id: u64) -> BoxFuture<'a, Result<Option<Project>>>;

	fn group<'a>(&'a self, group_id: u64) -> BoxFuture<'a, Result<Option<Group>>>;

	/// Every project under the group's hierarchy.
	fn group_projects<'a>(&'a self, group_id: u64) -> BoxFuture<'a, Result<Vec<Project>>>;

	/// Projects that still exist among `project_ids`. Deleted ids are absent from the answer.
	fn projects<'a>(&'a self, project_ids: &'a [u64]) -> BoxFuture<'a, Result<Vec<Project>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
	#[error("connection failed: {0}")]
	Connection(String),
	#[error("request failed: {0}")]
	Response(String),
}

pub trait SearchBackend
where
	Self: Send + Sync,
{
	/// Sends `request` to `node` and returns the raw response document.
	fn search<'a>(
		&'a self,
		node: &'a Node,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, std::result::Result<Value, BackendError>>;
}

#[derive(Clone)]
pub struct Providers {
	pub authorization: Arc<dyn AuthorizationProvider>,
	pub catalog: Arc<dyn Catalog>,
	pub backend: Arc<dyn SearchBackend>,
}
impl Providers {
	pub fn new(
		authorization: Arc<dyn AuthorizationProvider>,
		catalog: Arc<dyn Catalog>,
		backend: Arc<dyn SearchBackend>,
	) -> Self {
		Self { authorization, catalog, backend }
	}
}

pub struct LodeService {
	pub cfg: Config,
	pub dispatcher: Dispatcher,
	pub cache: ResultCache,
	pub providers: Providers,
}
impl LodeService {
	pub fn new(
		cfg: Config,
		store: Arc<dyn KvStore>,
		topology: Arc<dyn TopologyStore>,
		providers: Providers,
	) -> Self {
		let dispatcher = Dispatcher::new(&cfg, store.clone(), topology);
		let cache = ResultCache::new(store, &cfg.storage.kv.namespace, cfg.search.cache.clone());

		Self { cfg, dispatcher, cache, providers }
	}
}
