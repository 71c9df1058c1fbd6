mod common;

use std::collections::HashMap;

use serde_json::{Value, json};
use time::OffsetDateTime;

use lode_config::Config;
use lode_domain::{
	access::ACCESS_BRANCHES,
	filters::QueryKind,
	query::{
		QUERY_STRING_CONTEXT, REPO_IDS_CONTEXT, RegexFlag, SearchFilters, SearchLevel, SearchMode,
		TRAVERSAL_IDS_CONTEXT,
	},
	response::FileMatch,
};
use lode_service::{
	BackendError, Error, Group, Project, SearchParams, SearchState, results::FailureKind,
};

use common::{
	Harness, MemoryCatalog, ROOT_NAMESPACE_ID, ScriptedBackend, StaticAuthorization,
	backend_response, node, project, ready_replica,
};

fn catalog() -> MemoryCatalog {
	MemoryCatalog {
		projects: vec![
			project(5),
			Project { archived: true, ..project(6) },
			Project { forked: true, ..project(7) },
			Project { pending_delete: true, ..project(8) },
		],
		groups: vec![
			Group { id: 100, root_namespace_id: ROOT_NAMESPACE_ID, traversal_ids: vec![100] },
			Group { id: 200, root_namespace_id: ROOT_NAMESPACE_ID, traversal_ids: vec![100, 200] },
		],
		group_members: HashMap::from([(100, vec![5, 6, 7, 8]), (200, vec![6])]),
	}
}

fn fallback() -> Value {
	backend_response(&[(5, "a.rs"), (6, "b.rs"), (7, "c.rs"), (999, "d.rs")], 4, 9)
}

fn setup_with(cfg: Config, authorization: StaticAuthorization) -> Harness {
	let now = OffsetDateTime::now_utc();
	let topology = common::seeded_topology(vec![node(1, now), node(2, now)]);

	topology.upsert_replica(ready_replica(1), &[1]);

	common::harness(cfg, topology, authorization, catalog(), ScriptedBackend::new(fallback()))
}

fn setup() -> Harness {
	setup_with(common::test_config(), StaticAuthorization::default())
}

fn params(level: SearchLevel, scope_id: Option<u64>) -> SearchParams {
	SearchParams {
		actor: None,
		query: "needle".to_string(),
		level,
		scope_id,
		filters: SearchFilters::default(),
		page: 1,
		per_page: None,
		regex: None,
		multi_match: false,
	}
}

fn paths(files: &[FileMatch]) -> Vec<&str> {
	files.iter().map(|file| file.path.as_str()).collect()
}

#[tokio::test]
async fn project_search_walks_every_state() {
	let harness = setup();
	let results =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(
		results.transitions(),
		&[
			SearchState::Init,
			SearchState::QueryBuilt,
			SearchState::NodesResolved,
			SearchState::CacheConsulted,
			SearchState::BackendCalled,
			SearchState::Parsed,
			SearchState::PostFiltered,
			SearchState::Done,
		]
	);
	assert_eq!(results.state(), SearchState::Done);
	assert!(!results.failed());
	assert_eq!(results.mode(), SearchMode::Exact);
	assert_eq!(results.per_page(), 2);
	assert_eq!(paths(results.files()), vec!["a.rs"]);
	assert_eq!(results.file_count(), 4);
	assert_eq!(results.match_count(), 9);

	let calls = harness.backend.calls();

	assert_eq!(calls.len(), 1);

	let (node_id, request) = &calls[0];

	assert_eq!(*node_id, 1);
	assert_eq!(request.max_file_match_results, 6);
	assert!(!request.is_forwarded());

	let query = request.query.as_ref().expect("Expected an inline query.");
	let scope = query.find_context(REPO_IDS_CONTEXT).expect("Expected a repo id scope.");

	assert_eq!(scope.kind(), &QueryKind::RepoIds(vec![5]));
	assert!(query.find_context(ACCESS_BRANCHES).is_none());
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() {
	let harness = setup();

	harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	let again =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert!(again.transitions().contains(&SearchState::CacheHit));
	assert!(!again.transitions().contains(&SearchState::BackendCalled));
	assert_eq!(paths(again.files()), vec!["a.rs"]);

	let second_page = harness
		.service
		.search(SearchParams { page: 2, ..params(SearchLevel::Project, Some(5)) })
		.await
		.expect("Search failed.");

	assert!(second_page.transitions().contains(&SearchState::CacheHit));
	assert!(second_page.files().is_empty());
	assert_eq!(second_page.file_count(), 4);
	assert_eq!(harness.backend.calls().len(), 1);
}

#[tokio::test]
async fn filters_keep_archived_and_forked_rows_when_asked() {
	let harness = setup();
	let filters = SearchFilters { include_archived: true, include_forked: true };
	let results = harness
		.service
		.search(SearchParams { filters, ..params(SearchLevel::Project, Some(5)) })
		.await
		.expect("Search failed.");

	assert_eq!(paths(results.files()), vec!["a.rs", "b.rs"]);

	let page = harness
		.service
		.search(SearchParams { filters, page: 2, ..params(SearchLevel::Project, Some(5)) })
		.await
		.expect("Search failed.");

	assert_eq!(paths(page.files()), vec!["c.rs"]);
}

#[tokio::test]
async fn connection_failure_degrades_and_backs_off_the_node() {
	let harness = setup();

	harness.backend.push(Err(BackendError::Connection("refused".to_string())));

	let results =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(
		results.transitions(),
		&[
			SearchState::Init,
			SearchState::QueryBuilt,
			SearchState::NodesResolved,
			SearchState::CacheConsulted,
			SearchState::BackendCalled,
			SearchState::Failed(FailureKind::ClientConnection),
		]
	);
	assert!(results.failed());
	assert_eq!(results.error(), Some("refused"));
	assert!(results.files().is_empty());
	assert_eq!(results.file_count(), 0);

	let backoff = harness.service.dispatcher.node_backoff(1);

	assert!(backoff.enabled(OffsetDateTime::now_utc()).await.expect("Failed to check backoff."));
	assert_eq!(backoff.failures().await.expect("Failed to read failures."), 1);

	let balancer = harness
		.service
		.dispatcher
		.load_balancer(vec![node(1, OffsetDateTime::now_utc())])
		.expect("Failed to build load balancer.");
	let distribution = balancer.distribution().await.expect("Failed to read distribution.");

	assert_eq!(distribution.get(&1), Some(&0.0));
}

#[tokio::test]
async fn backed_off_entry_node_degrades_without_a_call() {
	let harness = setup();

	harness
		.service
		.dispatcher
		.node_backoff(1)
		.backoff(OffsetDateTime::now_utc())
		.await
		.expect("Failed to back off.");

	let results =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(results.state(), SearchState::Failed(FailureKind::Backoff));
	assert!(results.error().is_some_and(|error| error.contains("backed off")));
	assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn entry_node_skips_backed_off_nodes() {
	let harness = setup();
	let now = OffsetDateTime::now_utc();

	harness.service.dispatcher.node_backoff(1).backoff(now).await.expect("Failed to back off.");

	let results =
		harness.service.search(params(SearchLevel::Global, None)).await.expect("Search failed.");

	assert_eq!(results.state(), SearchState::Done);
	assert_eq!(results.error(), None);

	let calls = harness.backend.calls();

	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, 2);
	assert_eq!(calls[0].1.forward_to.len(), 2);
}

#[tokio::test]
async fn every_node_backed_off_degrades_to_backoff() {
	let harness = setup();
	let now = OffsetDateTime::now_utc();

	for node_id in [1, 2] {
		harness
			.service
			.dispatcher
			.node_backoff(node_id)
			.backoff(now)
			.await
			.expect("Failed to back off.");
	}

	let results =
		harness.service.search(params(SearchLevel::Global, None)).await.expect("Search failed.");

	assert_eq!(results.state(), SearchState::Failed(FailureKind::Backoff));
	assert!(results.error().is_some_and(|error| error.contains("Node 1")));
	assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn multi_match_results_are_cached_separately() {
	let harness = setup();

	harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	let chunked = harness
		.service
		.search(SearchParams { multi_match: true, ..params(SearchLevel::Project, Some(5)) })
		.await
		.expect("Search failed.");

	assert!(chunked.transitions().contains(&SearchState::BackendCalled));
	assert!(!chunked.transitions().contains(&SearchState::CacheHit));

	let calls = harness.backend.calls();

	assert_eq!(calls.len(), 2);
	assert!(calls[0].1.max_line_match_results.is_some());
	assert_eq!(calls[1].1.max_line_match_results, None);
	assert!(calls[1].1.max_chunk_matches_per_file.is_some());
}

#[tokio::test]
async fn backend_response_errors_degrade_without_backoff() {
	let harness = setup();

	harness.backend.push(Err(BackendError::Response("bad gateway".to_string())));
	harness.backend.push(Ok(json!({ "unexpected": true })));

	let rejected =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(rejected.state(), SearchState::Failed(FailureKind::Response));
	assert_eq!(rejected.error(), Some("bad gateway"));

	let malformed =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(malformed.state(), SearchState::Failed(FailureKind::Response));

	let backoff = harness.service.dispatcher.node_backoff(1);

	assert!(!backoff.enabled(OffsetDateTime::now_utc()).await.expect("Failed to check backoff."));
}

#[tokio::test]
async fn counts_are_clamped_to_the_limit() {
	let mut cfg = common::test_config();

	cfg.search.count_limit = 3;

	let harness = setup_with(cfg, StaticAuthorization::default());
	let results =
		harness.service.search(params(SearchLevel::Project, Some(5))).await.expect("Search failed.");

	assert_eq!(results.file_count(), 3);
	assert_eq!(results.match_count(), 3);
}

#[tokio::test]
async fn group_search_scopes_by_traversal_ids_with_access_branches() {
	let authorization = StaticAuthorization { guest_projects: vec![5], ..Default::default() };
	let harness = setup_with(common::test_config(), authorization);
	let results = harness
		.service
		.search(SearchParams { actor: Some(42), ..params(SearchLevel::Group, Some(100)) })
		.await
		.expect("Search failed.");

	assert_eq!(results.state(), SearchState::Done);

	let calls = harness.backend.calls();
	let query = calls[0].1.query.as_ref().expect("Expected an inline query.");
	let scope = query.find_context(TRAVERSAL_IDS_CONTEXT).expect("Expected a traversal scope.");

	assert_eq!(
		scope.kind(),
		&QueryKind::Meta { key: "traversal_ids".to_string(), value: "^2s-".to_string() }
	);
	assert!(query.find_context(ACCESS_BRANCHES).is_some());
}

#[tokio::test]
async fn legacy_group_search_lists_searchable_projects() {
	let mut cfg = common::test_config();

	cfg.search.traversal_id_queries = false;

	let harness = setup_with(cfg, StaticAuthorization::default());

	harness.service.search(params(SearchLevel::Group, Some(100))).await.expect("Search failed.");

	let calls = harness.backend.calls();
	let query = calls[0].1.query.as_ref().expect("Expected an inline query.");
	let scope = query.find_context(REPO_IDS_CONTEXT).expect("Expected a project scope.");

	assert_eq!(scope.kind(), &QueryKind::RepoIds(vec![5]));
}

#[tokio::test]
async fn legacy_group_without_searchable_projects_is_empty() {
	let mut cfg = common::test_config();

	cfg.search.traversal_id_queries = false;

	let harness = setup_with(cfg, StaticAuthorization::default());
	let results =
		harness.service.search(params(SearchLevel::Group, Some(200))).await.expect("Search failed.");

	assert_eq!(results.transitions(), &[SearchState::Init, SearchState::Done]);
	assert!(results.files().is_empty());
	assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn global_search_forwards_to_every_online_node() {
	let harness = setup();
	let results =
		harness.service.search(params(SearchLevel::Global, None)).await.expect("Search failed.");

	assert_eq!(results.state(), SearchState::Done);

	let calls = harness.backend.calls();
	let (node_id, request) = &calls[0];

	assert_eq!(*node_id, 1);
	assert!(request.is_forwarded());
	assert_eq!(request.query, None);
	assert_eq!(request.forward_to.len(), 2);
	assert!(request.forward_to[0].query.find_context(ACCESS_BRANCHES).is_some());
}

#[tokio::test]
async fn regex_flag_passes_the_pattern_through() {
	let harness = setup();
	let results = harness
		.service
		.search(SearchParams {
			query: "fn .*_test".to_string(),
			regex: Some(RegexFlag::Text("true".to_string())),
			..params(SearchLevel::Project, Some(5))
		})
		.await
		.expect("Search failed.");

	assert_eq!(results.mode(), SearchMode::Regex);

	let calls = harness.backend.calls();
	let query = calls[0].1.query.as_ref().expect("Expected an inline query.");
	let text = query.find_context(QUERY_STRING_CONTEXT).expect("Expected a query string.");

	assert_eq!(text.kind(), &QueryKind::QueryString { query: "fn .*_test".to_string() });
}

#[tokio::test]
async fn per_page_is_capped_at_the_maximum() {
	let harness = setup();
	let results = harness
		.service
		.search(SearchParams { per_page: Some(50), ..params(SearchLevel::Project, Some(5)) })
		.await
		.expect("Search failed.");

	assert_eq!(results.per_page(), 10);
	assert_eq!(harness.backend.calls()[0].1.max_file_match_results, 30);
}

#[tokio::test]
async fn invalid_arguments_are_errors() {
	let harness = setup();
	let cases = vec![
		SearchParams { query: "   ".to_string(), ..params(SearchLevel::Project, Some(5)) },
		SearchParams { page: 0, ..params(SearchLevel::Project, Some(5)) },
		SearchParams { per_page: Some(0), ..params(SearchLevel::Project, Some(5)) },
		params(SearchLevel::Project, None),
		params(SearchLevel::Project, Some(404)),
		params(SearchLevel::Group, Some(404)),
	];

	for case in cases {
		let err = harness.service.search(case).await.expect_err("Expected an invalid argument.");

		assert!(matches!(err, Error::InvalidArgument { .. }), "Unexpected error: {err}");
	}

	assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn search_params_deserialize_with_defaults() {
	let params: SearchParams = serde_json::from_value(json!({
		"query": "needle",
		"level": "group",
		"scope_id": 100,
		"regex": "true"
	}))
	.expect("Failed to parse params.");

	assert_eq!(params.page, 1);
	assert_eq!(params.per_page, None);
	assert_eq!(params.actor, None);
	assert_eq!(params.regex, Some(RegexFlag::Text("true".to_string())));
	assert_eq!(params.filters, SearchFilters::default());
}

#[tokio::test]
async fn search_params_reject_unsupported_levels() {
	let err = serde_json::from_value::<SearchParams>(json!({
		"query": "needle",
		"level": "instance"
	}))
	.expect_err("Expected unknown level to fail.");

	assert!(err.to_string().contains("Unsupported search level: instance"), "{err}");
}
