//! Primitive query nodes understood by the search backend.
//!
//! Every builder here is a pure function. Builders that take a list or a pattern reject empty
//! input with [`Error::InvalidArgument`] instead of producing a node that would match nothing (or
//! everything) on the backend.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const META_PROJECT_ID: &str = "project_id";
pub const META_TRAVERSAL_IDS: &str = "traversal_ids";
pub const META_ARCHIVED: &str = "archived";
pub const META_FORKED: &str = "forked";
pub const META_VISIBILITY_LEVEL: &str = "visibility_level";
pub const META_REPOSITORY_ACCESS_LEVEL: &str = "repository_access_level";

/// Largest id the backend accepts in a `repo_ids` list.
pub const MAX_REPO_ID: u64 = u32::MAX as u64;

static TRAVERSAL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new("^(?:[0-9a-z]+-)+$").unwrap_or_else(|err| unreachable!("static pattern: {err}"))
});

#[derive(Debug, Clone, PartialEq)]
pub struct QueryNode {
	kind: QueryKind,
	context: Option<String>,
}
impl QueryNode {
	fn new(kind: QueryKind) -> Self {
		Self { kind, context: None }
	}

	/// Attaches a debug label. Labels are serialized as `_context.name` and never change matching.
	pub fn with_context(mut self, name: impl Into<String>) -> Self {
		self.context = Some(name.into());

		self
	}

	pub fn kind(&self) -> &QueryKind {
		&self.kind
	}

	pub fn context_name(&self) -> Option<&str> {
		self.context.as_deref()
	}

	/// Children of an `and`/`or` node, the single child of `not`/`symbol`, empty for leaves.
	pub fn children(&self) -> &[QueryNode] {
		match &self.kind {
			QueryKind::And(children) | QueryKind::Or(children) => children,
			QueryKind::Not(child) | QueryKind::Symbol(child) => std::slice::from_ref(child.as_ref()),
			_ => &[],
		}
	}

	/// Context names of the direct children, in order. Unlabelled children are skipped.
	pub fn child_context_names(&self) -> Vec<&str> {
		self.children().iter().filter_map(QueryNode::context_name).collect()
	}

	/// Depth-first search for a node carrying `name`.
	pub fn find_context(&self, name: &str) -> Option<&QueryNode> {
		if self.context_name() == Some(name) {
			return Some(self);
		}

		self.children().iter().find_map(|child| child.find_context(name))
	}

	pub fn to_value(&self) -> Value {
		let mut out = Map::new();
		let (tag, body) = match &self.kind {
			QueryKind::QueryString { query } =>
				("query_string", serde_json::json!({ "query": query })),
			QueryKind::Substring { pattern, options } => {
				let mut body = options.to_map();

				body.insert("pattern".to_string(), Value::String(pattern.clone()));

				("substring", Value::Object(body))
			},
			QueryKind::Regexp { pattern, options } => {
				let mut body = options.to_map();

				body.insert("regexp".to_string(), Value::String(pattern.clone()));

				("regexp", Value::Object(body))
			},
			QueryKind::Meta { key, value } =>
				("meta", serde_json::json!({ "key": key, "value": value })),
			QueryKind::RepoIds(ids) => ("repo_ids", serde_json::json!(ids)),
			QueryKind::Symbol(child) => ("symbol", serde_json::json!({ "expr": child.to_value() })),
			QueryKind::And(children) => (
				"and",
				serde_json::json!({ "children": children.iter().map(Self::to_value).collect::<Vec<_>>() }),
			),
			QueryKind::Or(children) => (
				"or",
				serde_json::json!({ "children": children.iter().map(Self::to_value).collect::<Vec<_>>() }),
			),
			QueryKind::Not(child) => ("not", serde_json::json!({ "child": child.to_value() })),
		};

		out.insert(tag.to_string(), body);

		if let Some(name) = &self.context {
			out.insert("_context".to_string(), serde_json::json!({ "name": name }));
		}

		Value::Object(out)
	}
}
impl Serialize for QueryNode {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		self.to_value().serialize(serializer)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
	QueryString { query: String },
	Substring { pattern: String, options: MatchOptions },
	Regexp { pattern: String, options: MatchOptions },
	Meta { key: String, value: String },
	RepoIds(Vec<u32>),
	Symbol(Box<QueryNode>),
	And(Vec<QueryNode>),
	Or(Vec<QueryNode>),
	Not(Box<QueryNode>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
	pub case_sensitive: Option<bool>,
	pub file_name: Option<bool>,
	pub content: Option<bool>,
}
impl MatchOptions {
	fn to_map(self) -> Map<String, Value> {
		let mut map = Map::new();

		for (key, value) in [
			("case_sensitive", self.case_sensitive),
			("file_name", self.file_name),
			("content", self.content),
		] {
			if let Some(value) = value {
				map.insert(key.to_string(), Value::Bool(value));
			}
		}

		map
	}
}

pub fn by_query_string(query: &str) -> Result<QueryNode> {
	if query.trim().is_empty() {
		return Err(Error::InvalidArgument("query string must be non-empty.".to_string()));
	}

	Ok(QueryNode::new(QueryKind::QueryString { query: query.to_string() }))
}

pub fn by_substring(pattern: &str, options: MatchOptions) -> Result<QueryNode> {
	if pattern.is_empty() {
		return Err(Error::InvalidArgument("substring pattern must be non-empty.".to_string()));
	}

	Ok(QueryNode::new(QueryKind::Substring { pattern: pattern.to_string(), options }))
}

pub fn by_regexp(pattern: &str, options: MatchOptions) -> Result<QueryNode> {
	if pattern.is_empty() {
		return Err(Error::InvalidArgument("regexp must be non-empty.".to_string()));
	}

	Regex::new(pattern)
		.map_err(|err| Error::InvalidArgument(format!("regexp '{pattern}' is invalid: {err}")))?;

	Ok(QueryNode::new(QueryKind::Regexp { pattern: pattern.to_string(), options }))
}

pub fn by_meta(key: &str, value: &str) -> Result<QueryNode> {
	if key.trim().is_empty() {
		return Err(Error::InvalidArgument("meta key must be non-empty.".to_string()));
	}
	if value.is_empty() {
		return Err(Error::InvalidArgument(format!("meta value for '{key}' must be non-empty.")));
	}

	Ok(QueryNode::new(QueryKind::Meta { key: key.to_string(), value: value.to_string() }))
}

pub fn by_repo_ids(ids: &[u64]) -> Result<QueryNode> {
	if ids.is_empty() {
		return Err(Error::InvalidArgument("repo ids must be non-empty.".to_string()));
	}

	let mut repo_ids = Vec::with_capacity(ids.len());

	for id in ids {
		let repo_id = u32::try_from(*id).map_err(|_| {
			Error::InvalidArgument(format!("repo id {id} exceeds the 32-bit repo id range."))
		})?;

		repo_ids.push(repo_id);
	}

	Ok(QueryNode::new(QueryKind::RepoIds(repo_ids)))
}

pub fn by_symbol(child: QueryNode) -> QueryNode {
	QueryNode::new(QueryKind::Symbol(Box::new(child)))
}

/// Matches one project through its meta field. The value is anchored so `12` never matches `123`.
pub fn by_project_id(project_id: u64) -> Result<QueryNode> {
	if project_id == 0 {
		return Err(Error::InvalidArgument("project id must be present.".to_string()));
	}

	by_meta(META_PROJECT_ID, &format!("^{project_id}$"))
}

pub fn by_project_ids(project_ids: &[u64]) -> Result<QueryNode> {
	if project_ids.is_empty() {
		return Err(Error::InvalidArgument("project ids must be non-empty.".to_string()));
	}

	let children = project_ids.iter().map(|id| by_project_id(*id)).collect::<Result<Vec<_>>>()?;

	or_filters(children)
}

/// Matches every project below any of the given formatted traversal prefixes.
pub fn by_traversal_ids(prefixes: &[String]) -> Result<QueryNode> {
	if prefixes.is_empty() {
		return Err(Error::InvalidArgument("traversal ids must be non-empty.".to_string()));
	}

	for prefix in prefixes {
		if !TRAVERSAL_PREFIX.is_match(prefix) {
			return Err(Error::InvalidArgument(format!(
				"traversal id prefix '{prefix}' is not a formatted traversal path."
			)));
		}
	}

	let value = if prefixes.len() == 1 {
		format!("^{}", prefixes[0])
	} else {
		format!("^({})", prefixes.join("|"))
	};

	by_meta(META_TRAVERSAL_IDS, &value)
}

/// Repo-id list for ids that fit in 32 bits, meta project-id filters for the rest.
pub fn by_project_scope(project_ids: &[u64]) -> Result<QueryNode> {
	let (small, large): (Vec<u64>, Vec<u64>) =
		project_ids.iter().partition(|id| **id <= MAX_REPO_ID);

	match (small.is_empty(), large.is_empty()) {
		(true, true) => Err(Error::InvalidArgument("project ids must be non-empty.".to_string())),
		(false, true) => by_repo_ids(&small),
		(true, false) => by_project_ids(&large),
		(false, false) => or_filters(vec![by_repo_ids(&small)?, by_project_ids(&large)?]),
	}
}

pub fn and_filters(children: Vec<QueryNode>) -> Result<QueryNode> {
	if children.is_empty() {
		return Err(Error::InvalidArgument("and filter requires at least one child.".to_string()));
	}

	Ok(QueryNode::new(QueryKind::And(children)))
}

pub fn or_filters(children: Vec<QueryNode>) -> Result<QueryNode> {
	if children.is_empty() {
		return Err(Error::InvalidArgument("or filter requires at least one child.".to_string()));
	}

	Ok(QueryNode::new(QueryKind::Or(children)))
}

pub fn not_filter(child: QueryNode) -> QueryNode {
	QueryNode::new(QueryKind::Not(Box::new(child)))
}

/// Renders a namespace ancestry the way the index stores it: base-36 ids, each followed by `-`.
pub fn format_traversal_ids(ids: &[u64]) -> String {
	let mut out = String::new();

	for id in ids {
		out.push_str(&to_base36(*id));
		out.push('-');
	}

	out
}

fn to_base36(mut value: u64) -> String {
	const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

	if value == 0 {
		return "0".to_string();
	}

	let mut buf = Vec::new();

	while value > 0 {
		buf.push(DIGITS[(value % 36) as usize]);
		value /= 36;
	}

	buf.reverse();

	String::from_utf8_lossy(&buf).into_owned()
}
