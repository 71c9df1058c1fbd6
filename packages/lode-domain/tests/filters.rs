use serde_json::json;

use lode_domain::{
	Error,
	filters::{
		self, MatchOptions, QueryKind, by_meta, by_project_id, by_project_ids, by_project_scope,
		by_query_string, by_regexp, by_repo_ids, by_substring, by_symbol, by_traversal_ids,
		format_traversal_ids, not_filter, or_filters,
	},
};

#[test]
fn project_id_filter_is_anchored_meta() {
	let node = by_project_id(123).expect("Expected project id filter.");

	assert_eq!(node.to_value(), json!({ "meta": { "key": "project_id", "value": "^123$" } }));
}

#[test]
fn missing_project_id_is_rejected() {
	let err = by_project_id(0).expect_err("Expected invalid argument.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn project_ids_filter_is_or_of_meta_filters() {
	let node = by_project_ids(&[1, 2]).expect("Expected project ids filter.");
	let QueryKind::Or(children) = node.kind() else {
		panic!("Expected or node, got {node:?}.");
	};

	assert_eq!(children.len(), 2);
	assert_eq!(children[1].to_value()["meta"]["value"], "^2$");
}

#[test]
fn empty_inputs_are_rejected() {
	assert!(matches!(by_project_ids(&[]), Err(Error::InvalidArgument(_))));
	assert!(matches!(by_repo_ids(&[]), Err(Error::InvalidArgument(_))));
	assert!(matches!(by_traversal_ids(&[]), Err(Error::InvalidArgument(_))));
	assert!(matches!(by_query_string("   "), Err(Error::InvalidArgument(_))));
	assert!(matches!(by_substring("", MatchOptions::default()), Err(Error::InvalidArgument(_))));
	assert!(matches!(by_meta("archived", ""), Err(Error::InvalidArgument(_))));
	assert!(matches!(or_filters(Vec::new()), Err(Error::InvalidArgument(_))));
	assert!(matches!(filters::and_filters(Vec::new()), Err(Error::InvalidArgument(_))));
}

#[test]
fn repo_ids_reject_ids_beyond_32_bits() {
	let err = by_repo_ids(&[u64::from(u32::MAX) + 1]).expect_err("Expected invalid argument.");

	assert!(err.to_string().contains("32-bit"));
}

#[test]
fn project_scope_splits_small_and_large_ids() {
	let large = u64::from(u32::MAX) + 7;
	let node = by_project_scope(&[5, large]).expect("Expected project scope filter.");

	assert_eq!(
		node.to_value(),
		json!({
			"or": { "children": [
				{ "repo_ids": [5] },
				{ "or": { "children": [
					{ "meta": { "key": "project_id", "value": format!("^{large}$") } }
				] } }
			] }
		})
	);
}

#[test]
fn invalid_regexp_is_rejected() {
	let err = by_regexp("foo(", MatchOptions::default()).expect_err("Expected invalid argument.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn match_options_are_serialized_only_when_set() {
	let options = MatchOptions { case_sensitive: Some(true), ..MatchOptions::default() };
	let node = by_substring("needle", options).expect("Expected substring filter.");

	assert_eq!(node.to_value(), json!({ "substring": { "pattern": "needle", "case_sensitive": true } }));

	let node = by_regexp("fo+", MatchOptions::default()).expect("Expected regexp filter.");

	assert_eq!(node.to_value(), json!({ "regexp": { "regexp": "fo+" } }));
}

#[test]
fn traversal_ids_are_formatted_in_base36() {
	assert_eq!(format_traversal_ids(&[9, 1000]), "9-rs-");
	assert_eq!(format_traversal_ids(&[35, 36]), "z-10-");
	assert_eq!(format_traversal_ids(&[]), "");
}

#[test]
fn traversal_filter_anchors_prefixes() {
	let single = by_traversal_ids(&["9-".to_string()]).expect("Expected traversal filter.");
	let many = by_traversal_ids(&["9-".to_string(), "a-b-".to_string()])
		.expect("Expected traversal filter.");

	assert_eq!(single.to_value()["meta"]["value"], "^9-");
	assert_eq!(many.to_value()["meta"]["value"], "^(9-|a-b-)");
}

#[test]
fn traversal_filter_rejects_unformatted_prefixes() {
	let err = by_traversal_ids(&["9-rs".to_string()]).expect_err("Expected invalid argument.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn context_labels_serialize_and_are_searchable() {
	let inner = by_meta("archived", "^t$").expect("Expected meta filter.");
	let node = not_filter(inner).with_context("archived");
	let symbol = by_symbol(by_query_string("main").expect("Expected query string."));

	assert_eq!(
		node.to_value(),
		json!({
			"not": { "child": { "meta": { "key": "archived", "value": "^t$" } } },
			"_context": { "name": "archived" }
		})
	);
	assert_eq!(symbol.to_value(), json!({ "symbol": { "expr": { "query_string": { "query": "main" } } } }));

	let tree = or_filters(vec![node]).expect("Expected or filter.");

	assert!(tree.find_context("archived").is_some());
	assert!(tree.find_context("forked").is_none());
}
