#![allow(dead_code)]

use std::{
	collections::{HashMap, VecDeque},
	sync::{Arc, Mutex},
};

use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

use lode_config::{
	Config, Dispatch, Kv, Search, SearchCache, SearchProtocol, Service, Storage, Topology,
};
use lode_domain::access::AccessLevel;
use lode_service::{
	AuthorizationProvider, BackendError, BoxFuture, Catalog, Dispatcher, Group, LodeService,
	Project, Providers, Result, SearchBackend, SearchRequest,
};
use lode_storage::{
	kv::{KvStore, MemoryStore},
	models::{EnabledNamespace, Node, Replica, ReplicaState},
	topology::{MemoryTopology, TopologyStore},
};

pub const ROOT_NAMESPACE_ID: u64 = 100;
pub const ENABLED_NAMESPACE_ID: u64 = 10;

pub fn test_config() -> Config {
	Config {
		service: Service { log_level: "info".to_string() },
		storage: Storage {
			postgres: None,
			kv: Kv { backend: "memory".to_string(), namespace: "test".to_string() },
		},
		topology: Topology { online_threshold_secs: 60 },
		dispatch: Dispatch {
			selection_ttl_secs: 300,
			max_backoff_secs: 1_800,
			max_jitter_ms: 0,
			load_weight: 1.0,
		},
		search: Search {
			default_per_page: 2,
			max_per_page: 10,
			count_limit: 100,
			traversal_id_queries: true,
			cache: SearchCache { enabled: true, ttl_secs: 300, max_pages: 3 },
			protocol: SearchProtocol::default(),
		},
	}
}

pub fn node(id: u64, now: OffsetDateTime) -> Node {
	Node { id, endpoint: format!("http://node-{id}:6070"), last_seen_at: now }
}

pub fn offline_node(id: u64, now: OffsetDateTime) -> Node {
	Node { last_seen_at: now - Duration::minutes(10), ..node(id, now) }
}

pub fn ready_replica(id: u64) -> Replica {
	Replica { id, enabled_namespace_id: ENABLED_NAMESPACE_ID, state: ReplicaState::Ready }
}

/// Enables [`ROOT_NAMESPACE_ID`] and adds `nodes`, without any replica.
pub fn seeded_topology(nodes: Vec<Node>) -> Arc<MemoryTopology> {
	let topology = Arc::new(MemoryTopology::new());

	for node in nodes {
		topology.upsert_node(node);
	}

	topology.enable_namespace(EnabledNamespace {
		id: ENABLED_NAMESPACE_ID,
		root_namespace_id: ROOT_NAMESPACE_ID,
	});

	topology
}

pub fn dispatcher(cfg: &Config, store: Arc<MemoryStore>, topology: Arc<MemoryTopology>) -> Dispatcher {
	let store: Arc<dyn KvStore> = store;
	let topology: Arc<dyn TopologyStore> = topology;

	Dispatcher::new(cfg, store, topology)
}

#[derive(Debug, Default)]
pub struct StaticAuthorization {
	pub bypass: bool,
	pub guest_projects: Vec<u64>,
	pub reporter_projects: Vec<u64>,
	pub guest_groups: Vec<String>,
	pub reporter_groups: Vec<String>,
	pub custom_projects: Vec<u64>,
	pub custom_groups: Vec<String>,
}
impl AuthorizationProvider for StaticAuthorization {
	fn can_bypass<'a>(&'a self, _actor_id: u64) -> BoxFuture<'a, Result<bool>> {
		let bypass = self.bypass;

		Box::pin(async move { Ok(bypass) })
	}

	fn project_ids_at<'a>(
		&'a self,
		_actor_id: u64,
		min_level: AccessLevel,
	) -> BoxFuture<'a, Result<Vec<u64>>> {
		let ids = if min_level <= AccessLevel::Guest {
			self.guest_projects.clone()
		} else {
			self.reporter_projects.clone()
		};

		Box::pin(async move { Ok(ids) })
	}

	fn group_prefixes_at<'a>(
		&'a self,
		_actor_id: u64,
		min_level: AccessLevel,
	) -> BoxFuture<'a, Result<Vec<String>>> {
		let prefixes = if min_level <= AccessLevel::Guest {
			self.guest_groups.clone()
		} else {
			self.reporter_groups.clone()
		};

		Box::pin(async move { Ok(prefixes) })
	}

	fn custom_role_project_ids<'a>(&'a self, _actor_id: u64) -> BoxFuture<'a, Result<Vec<u64>>> {
		let ids = self.custom_projects.clone();

		Box::pin(async move { Ok(ids) })
	}

	fn custom_role_group_prefixes<'a>(
		&'a self,
		_actor_id: u64,
	) -> BoxFuture<'a, Result<Vec<String>>> {
		let prefixes = self.custom_groups.clone();

		Box::pin(async move { Ok(prefixes) })
	}
}

pub fn project(id: u64) -> Project {
	Project {
		id,
		root_namespace_id: ROOT_NAMESPACE_ID,
		archived: false,
		forked: false,
		pending_delete: false,
	}
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
	pub projects: Vec<Project>,
	pub groups: Vec<Group>,
	pub group_members: HashMap<u64, Vec<u64>>,
}
impl Catalog for MemoryCatalog {
	fn project<'a>(&'a self, project_id: u64) -> BoxFuture<'a, Result<Option<Project>>> {
		let project = self.projects.iter().find(|project| project.id == project_id).cloned();

		Box::pin(async move { Ok(project) })
	}

	fn group<'a>(&'a self, group_id: u64) -> BoxFuture<'a, Result<Option<Group>>> {
		let group = self.groups.iter().find(|group| group.id == group_id).cloned();

		Box::pin(async move { Ok(group) })
	}

	fn group_projects<'a>(&'a self, group_id: u64) -> BoxFuture<'a, Result<Vec<Project>>> {
		let members = self.group_members.get(&group_id).cloned().unwrap_or_default();
		let projects: Vec<Project> = self
			.projects
			.iter()
			.filter(|project| members.contains(&project.id))
			.cloned()
			.collect();

		Box::pin(async move { Ok(projects) })
	}

	fn projects<'a>(&'a self, project_ids: &'a [u64]) -> BoxFuture<'a, Result<Vec<Project>>> {
		let projects: Vec<Project> = self
			.projects
			.iter()
			.filter(|project| project_ids.contains(&project.id))
			.cloned()
			.collect();

		Box::pin(async move { Ok(projects) })
	}
}

/// Answers with queued responses first, then with `fallback`. Records every call.
pub struct ScriptedBackend {
	queued: Mutex<VecDeque<std::result::Result<Value, BackendError>>>,
	fallback: Value,
	calls: Mutex<Vec<(u64, SearchRequest)>>,
}
impl ScriptedBackend {
	pub fn new(fallback: Value) -> Self {
		Self { queued: Mutex::new(VecDeque::new()), fallback, calls: Mutex::new(Vec::new()) }
	}

	pub fn push(&self, response: std::result::Result<Value, BackendError>) {
		self.queued.lock().expect("Backend queue poisoned.").push_back(response);
	}

	pub fn calls(&self) -> Vec<(u64, SearchRequest)> {
		self.calls.lock().expect("Backend calls poisoned.").clone()
	}
}
impl SearchBackend for ScriptedBackend {
	fn search<'a>(
		&'a self,
		node: &'a Node,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, std::result::Result<Value, BackendError>> {
		self.calls.lock().expect("Backend calls poisoned.").push((node.id, request.clone()));

		let response = self
			.queued
			.lock()
			.expect("Backend queue poisoned.")
			.pop_front()
			.unwrap_or_else(|| Ok(self.fallback.clone()));

		Box::pin(async move { response })
	}
}

/// A backend document with one line match per `(project_id, path)` row.
pub fn backend_response(rows: &[(u64, &str)], file_count: u64, match_count: u64) -> Value {
	let files: Vec<Value> = rows
		.iter()
		.map(|(project_id, path)| {
			json!({
				"FileName": path,
				"RepositoryID": project_id,
				"Branches": ["main"],
				"Score": 1.0,
				"LineMatches": [{ "LineNumber": 1, "Line": "needle" }]
			})
		})
		.collect();

	json!({ "Result": { "Files": files, "FileCount": file_count, "MatchCount": match_count } })
}

pub struct Harness {
	pub service: LodeService,
	pub store: Arc<MemoryStore>,
	pub topology: Arc<MemoryTopology>,
	pub backend: Arc<ScriptedBackend>,
}

pub fn harness(
	cfg: Config,
	topology: Arc<MemoryTopology>,
	authorization: StaticAuthorization,
	catalog: MemoryCatalog,
	backend: ScriptedBackend,
) -> Harness {
	let store = Arc::new(MemoryStore::new());
	let backend = Arc::new(backend);
	let providers = Providers::new(Arc::new(authorization), Arc::new(catalog), backend.clone());
	let service = LodeService::new(cfg, store.clone(), topology.clone(), providers);

	Harness { service, store, topology, backend }
}
