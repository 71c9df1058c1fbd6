//! Search orchestration.
//!
//! A search moves through `Init -> QueryBuilt -> NodesResolved -> CacheConsulted ->
//! (BackendCalled | CacheHit) -> Parsed -> PostFiltered -> Done`. Connection, backoff and backend
//! response failures end in `Failed` with the message recorded and an empty result. Invalid
//! arguments and storage failures are returned as errors.

use std::{
	collections::HashMap,
	sync::atomic::{AtomicU32, Ordering},
	time::Duration as StdDuration,
};

use serde::Deserialize;
use time::OffsetDateTime;

use lode_domain::{
	access::{ActorAccess, FeaturePolicy},
	filters::{QueryNode, format_traversal_ids},
	query::{
		GroupScope, QueryOptions, RegexFlag, Scope, SearchFilters, SearchLevel, SearchMode,
		build_query,
	},
	response::{FileMatch, ParsedResponse, parse_response},
};
use lode_storage::models::Node;

use crate::{
	BackendError, Error, LodeService, Project, Result,
	access::resolve_actor_access,
	cache::CacheQuery,
	request::{SearchRequest, targets_for_nodes},
};

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
	/// Searching user. `None` searches anonymously.
	#[serde(default)]
	pub actor: Option<u64>,
	pub query: String,
	pub level: SearchLevel,
	/// Project id at project level, group id at group level, ignored at global level.
	#[serde(default)]
	pub scope_id: Option<u64>,
	#[serde(default)]
	pub filters: SearchFilters,
	#[serde(default = "default_page")]
	pub page: u32,
	#[serde(default)]
	pub per_page: Option<u32>,
	#[serde(default)]
	pub regex: Option<RegexFlag>,
	#[serde(default)]
	pub multi_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	ClientConnection,
	Backoff,
	Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
	Init,
	QueryBuilt,
	NodesResolved,
	CacheConsulted,
	BackendCalled,
	CacheHit,
	Parsed,
	PostFiltered,
	Done,
	Failed(FailureKind),
}

#[derive(Debug, Clone)]
pub struct SearchResults {
	transitions: Vec<SearchState>,
	mode: SearchMode,
	page: u32,
	per_page: u32,
	files: Vec<FileMatch>,
	file_count: u64,
	match_count: u64,
	error: Option<String>,
}
impl SearchResults {
	fn new(mode: SearchMode, page: u32, per_page: u32) -> Self {
		Self {
			transitions: vec![SearchState::Init],
			mode,
			page,
			per_page,
			files: Vec::new(),
			file_count: 0,
			match_count: 0,
			error: None,
		}
	}

	pub fn state(&self) -> SearchState {
		self.transitions.last().copied().unwrap_or(SearchState::Init)
	}

	/// Every state the search passed through, starting with `Init`.
	pub fn transitions(&self) -> &[SearchState] {
		&self.transitions
	}

	pub fn failed(&self) -> bool {
		matches!(self.state(), SearchState::Failed(_))
	}

	pub fn error(&self) -> Option<&str> {
		self.error.as_deref()
	}

	pub fn mode(&self) -> SearchMode {
		self.mode
	}

	pub fn page(&self) -> u32 {
		self.page
	}

	pub fn per_page(&self) -> u32 {
		self.per_page
	}

	pub fn files(&self) -> &[FileMatch] {
		&self.files
	}

	pub fn file_count(&self) -> u64 {
		self.file_count
	}

	pub fn match_count(&self) -> u64 {
		self.match_count
	}

	fn advance(&mut self, state: SearchState) {
		self.transitions.push(state);
	}

	fn fail(&mut self, kind: FailureKind, message: String) {
		tracing::warn!(?kind, error = %message, "Search degraded to an empty result.");

		self.files.clear();
		self.file_count = 0;
		self.match_count = 0;
		self.error = Some(message);
		self.advance(SearchState::Failed(kind));
	}
}

struct SearchTarget {
	scope: Scope,
	root_namespace_id: Option<u64>,
	group_id: Option<u64>,
	project_id: Option<u64>,
}

impl LodeService {
	pub async fn search(&self, params: SearchParams) -> Result<SearchResults> {
		let now = OffsetDateTime::now_utc();
		let text = params.query.trim();

		if text.is_empty() {
			return Err(Error::invalid("query must be non-empty."));
		}
		if params.page == 0 {
			return Err(Error::invalid("page must be at least 1."));
		}

		let per_page = params
			.per_page
			.unwrap_or(self.cfg.search.default_per_page)
			.min(self.cfg.search.max_per_page);

		if per_page == 0 {
			return Err(Error::invalid("per_page must be greater than zero."));
		}

		let mode = SearchMode::from_flag(params.regex.as_ref());
		let mut results = SearchResults::new(mode, params.page, per_page);
		let Some(target) = self.resolve_target(&params).await? else {
			tracing::debug!(scope_id = ?params.scope_id, "Group has no searchable projects.");

			results.advance(SearchState::Done);

			return Ok(results);
		};
		let policy = FeaturePolicy::repository();
		let access = if params.level == SearchLevel::Project {
			ActorAccess::default()
		} else {
			resolve_actor_access(self.providers.authorization.as_ref(), params.actor, &policy)
				.await?
		};
		let options = QueryOptions {
			scope: &target.scope,
			mode,
			filters: params.filters,
			access: &access,
			policy,
		};
		let query = build_query(text, &options)?;

		results.advance(SearchState::QueryBuilt);

		let nodes =
			self.dispatcher.select_nodes(params.level, target.root_namespace_id, now).await?;

		results.advance(SearchState::NodesResolved);

		let cache_query = CacheQuery {
			actor_id: params.actor,
			query: text,
			group_id: target.group_id,
			project_id: target.project_id,
			mode,
			filters: params.filters,
			multi_match: params.multi_match,
		};
		let backend_calls = AtomicU32::new(0);
		let calls = &backend_calls;
		let (nodes, query) = (&nodes, &query);
		let multi_match = params.multi_match;
		let fetched = self
			.cache
			.fetch(&cache_query, params.page, per_page, move |pages| {
				calls.fetch_add(1, Ordering::Relaxed);

				self.call_backend(nodes, query, pages.saturating_mul(per_page), multi_match)
			})
			.await;
		let called = backend_calls.load(Ordering::Relaxed) > 0;

		let page = match fetched {
			Ok(page) => page,
			Err(err) => {
				let (kind, message) = match err {
					Error::ClientConnection { message } => (FailureKind::ClientConnection, message),
					err @ Error::Backoff { .. } => (FailureKind::Backoff, err.to_string()),
					Error::Response { message } => (FailureKind::Response, message),
					err => return Err(err),
				};

				results.advance(SearchState::CacheConsulted);

				if called {
					results.advance(SearchState::BackendCalled);
				}

				results.fail(kind, message);

				return Ok(results);
			},
		};

		results.advance(SearchState::CacheConsulted);

		if called {
			results.advance(SearchState::BackendCalled);
		} else {
			results.advance(SearchState::CacheHit);
		}

		results.advance(SearchState::Parsed);

		let count_limit = self.cfg.search.count_limit;

		results.files = self.post_filter(page.files, &params.filters).await?;
		results.file_count = page.file_count.min(count_limit);
		results.match_count = page.match_count.min(count_limit);

		results.advance(SearchState::PostFiltered);
		results.advance(SearchState::Done);

		tracing::info!(
			level = %params.level,
			mode = mode.as_str(),
			page = params.page,
			files = results.files.len(),
			file_count = results.file_count,
			"Search completed."
		);

		Ok(results)
	}

	async fn resolve_target(&self, params: &SearchParams) -> Result<Option<SearchTarget>> {
		let catalog = self.providers.catalog.as_ref();

		match params.level {
			SearchLevel::Project => {
				let project_id = params
					.scope_id
					.ok_or_else(|| Error::invalid("project search requires a project id."))?;
				let project = catalog
					.project(project_id)
					.await?
					.ok_or_else(|| Error::invalid(format!("project {project_id} not found.")))?;

				Ok(Some(SearchTarget {
					scope: Scope::Project(project.id),
					root_namespace_id: Some(project.root_namespace_id),
					group_id: None,
					project_id: Some(project.id),
				}))
			},
			SearchLevel::Group => {
				let group_id = params
					.scope_id
					.ok_or_else(|| Error::invalid("group search requires a group id."))?;
				let group = catalog
					.group(group_id)
					.await?
					.ok_or_else(|| Error::invalid(format!("group {group_id} not found.")))?;
				let scope = if self.cfg.search.traversal_id_queries {
					GroupScope::TraversalIds(format_traversal_ids(&group.traversal_ids))
				} else {
					let project_ids: Vec<u64> = catalog
						.group_projects(group_id)
						.await?
						.iter()
						.filter(|project| is_searchable(project, &params.filters))
						.map(|project| project.id)
						.collect();

					if project_ids.is_empty() {
						return Ok(None);
					}

					GroupScope::ProjectIds(project_ids)
				};

				Ok(Some(SearchTarget {
					scope: Scope::Group(scope),
					root_namespace_id: Some(group.root_namespace_id),
					group_id: Some(group.id),
					project_id: None,
				}))
			},
			SearchLevel::Global => Ok(Some(SearchTarget {
				scope: Scope::Global,
				root_namespace_id: None,
				group_id: None,
				project_id: None,
			})),
		}
	}

	async fn call_backend(
		&self,
		nodes: &[Node],
		query: &QueryNode,
		max_files: u32,
		multi_match: bool,
	) -> Result<ParsedResponse> {
		let protocol = &self.cfg.search.protocol;
		let request =
			SearchRequest::new(protocol, targets_for_nodes(nodes, query), max_files, multi_match)?;
		let balancer = self.dispatcher.load_balancer(nodes.to_vec())?;
		let now = OffsetDateTime::now_utc();
		let mut backed_off = Vec::new();

		for node in nodes {
			if self.dispatcher.node_backoff(node.id).enabled(now).await? {
				backed_off.push(node.id);
			}
		}

		// The entry node is the least-loaded one outside backoff.
		let picked = balancer.pick_where(|node| !backed_off.contains(&node.id)).await?;
		let Some((entry, _)) = picked else {
			let entry = balancer.pick().await?;

			return Err(Error::Backoff {
				node_id: entry.id,
				seconds_remaining: self
					.dispatcher
					.node_backoff(entry.id)
					.seconds_remaining(now)
					.await?,
			});
		};
		let entry = entry.clone();
		let backoff = self.dispatcher.node_backoff(entry.id);

		if !backed_off.is_empty() {
			tracing::debug!(?backed_off, entry = entry.id, "Skipped backed-off entry nodes.");
		}

		let lease = balancer.acquire(&entry, self.cfg.dispatch.load_weight).await?;
		let timeout = StdDuration::from_secs(protocol.timeout_secs);
		let outcome =
			tokio::time::timeout(timeout, self.providers.backend.search(&entry, &request)).await;

		lease.release().await?;

		let value = match outcome {
			Ok(Ok(value)) => value,
			Ok(Err(BackendError::Connection(message))) => {
				backoff.backoff(OffsetDateTime::now_utc()).await?;

				return Err(Error::ClientConnection { message });
			},
			Ok(Err(BackendError::Response(message))) => return Err(Error::Response { message }),
			Err(_) => {
				backoff.backoff(OffsetDateTime::now_utc()).await?;

				return Err(Error::ClientConnection {
					message: format!(
						"node {} did not answer within {}s.",
						entry.id, protocol.timeout_secs
					),
				});
			},
		};

		tracing::debug!(
			node_id = entry.id,
			forwarded = request.is_forwarded(),
			max_files,
			"Backend answered."
		);

		Ok(parse_response(&value)?)
	}

	/// Drops rows whose project is gone, pending deletion, or excluded by the filters.
	async fn post_filter(
		&self,
		files: Vec<FileMatch>,
		filters: &SearchFilters,
	) -> Result<Vec<FileMatch>> {
		let mut project_ids: Vec<u64> =
			files.iter().map(|file| file.project_id).filter(|id| *id != 0).collect();

		project_ids.sort_unstable();
		project_ids.dedup();

		if project_ids.is_empty() {
			return Ok(Vec::new());
		}

		let projects: HashMap<u64, Project> = self
			.providers
			.catalog
			.projects(&project_ids)
			.await?
			.into_iter()
			.map(|project| (project.id, project))
			.collect();
		let before = files.len();
		let kept: Vec<FileMatch> = files
			.into_iter()
			.filter(|file| {
				projects.get(&file.project_id).is_some_and(|project| is_searchable(project, filters))
			})
			.collect();

		if kept.len() < before {
			tracing::debug!(dropped = before - kept.len(), "Post-filtered search rows.");
		}

		Ok(kept)
	}
}

fn is_searchable(project: &Project, filters: &SearchFilters) -> bool {
	!project.pending_delete
		&& (filters.include_archived || !project.archived)
		&& (filters.include_forked || !project.forked)
}

fn default_page() -> u32 {
	1
}
