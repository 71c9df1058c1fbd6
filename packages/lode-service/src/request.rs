//! Backend request assembly.
//!
//! A request to one node carries its query inline. A request spanning several nodes is sent to
//! one entry node with a `forward_to` list, one target per node.

use serde::Serialize;

use lode_config::SearchProtocol;
use lode_domain::filters::{self, QueryNode, by_repo_ids};
use lode_storage::models::Node;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardTarget {
	pub endpoint: String,
	pub query: QueryNode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
	pub version: u32,
	pub timeout: String,
	pub num_context_lines: u32,
	pub max_file_match_window: u32,
	pub max_file_match_results: u32,
	pub max_line_match_window: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_line_match_results: Option<u32>,
	pub max_line_match_results_per_file: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_chunk_matches_per_file: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub query: Option<QueryNode>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub forward_to: Vec<ForwardTarget>,
}
impl SearchRequest {
	/// Builds the request for `targets`, asking for at most `max_files` file matches.
	///
	/// Multi-match mode drops the line-level result cap and caps chunk matches per file instead.
	pub fn new(
		protocol: &SearchProtocol,
		targets: Vec<ForwardTarget>,
		max_files: u32,
		multi_match: bool,
	) -> Result<Self> {
		if targets.is_empty() {
			return Err(Error::invalid("no online nodes to search."));
		}

		let (query, forward_to) = if targets.len() == 1 {
			(targets.into_iter().next().map(|target| target.query), Vec::new())
		} else {
			(None, targets)
		};

		Ok(Self {
			version: protocol.version,
			timeout: format!("{}s", protocol.timeout_secs),
			num_context_lines: protocol.context_lines,
			max_file_match_window: protocol.file_match_window,
			max_file_match_results: max_files,
			max_line_match_window: protocol.line_match_window,
			max_line_match_results: (!multi_match).then_some(protocol.line_match_results),
			max_line_match_results_per_file: protocol.line_matches_per_file,
			max_chunk_matches_per_file: multi_match.then_some(protocol.chunk_matches_per_file),
			query,
			forward_to,
		})
	}

	pub fn is_forwarded(&self) -> bool {
		!self.forward_to.is_empty()
	}
}

/// One target per node, each carrying the full query.
pub fn targets_for_nodes(nodes: &[Node], query: &QueryNode) -> Vec<ForwardTarget> {
	nodes
		.iter()
		.map(|node| ForwardTarget { endpoint: node.endpoint.clone(), query: query.clone() })
		.collect()
}

/// One target per node from explicit node-to-repository assignments.
///
/// Each target query is `and(text_query, repo_ids(ids))` over the repositories that node hosts.
pub fn targets_for_assignments(
	text_query: &QueryNode,
	assignments: &[(Node, Vec<u64>)],
) -> Result<Vec<ForwardTarget>> {
	let mut targets = Vec::with_capacity(assignments.len());

	for (node, repo_ids) in assignments {
		let query = filters::and_filters(vec![text_query.clone(), by_repo_ids(repo_ids)?])?;

		targets.push(ForwardTarget { endpoint: node.endpoint.clone(), query });
	}

	Ok(targets)
}
