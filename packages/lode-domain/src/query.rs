//! Permission-scoped query compilation.
//!
//! The top-level `and` always lists its children as text query, scoping filter, non-scoping meta
//! filters, access branches. A meta filter ahead of the scoping filter makes the backend scan every
//! shard. Filters that are switched off are dropped; the remaining children keep their order.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
	Error, Result,
	access::{self, ActorAccess, FeaturePolicy},
	filters::{
		self, MAX_REPO_ID, META_ARCHIVED, META_FORKED, QueryNode, by_meta, by_project_id,
		by_project_scope, by_query_string, by_repo_ids, by_traversal_ids, not_filter,
	},
};

pub const QUERY_STRING_CONTEXT: &str = "query_string";
pub const REPO_IDS_CONTEXT: &str = "repo_ids";
pub const PROJECT_ID_CONTEXT: &str = "project_id";
pub const TRAVERSAL_IDS_CONTEXT: &str = "traversal_ids";
pub const ARCHIVED_CONTEXT: &str = "archived";
pub const FORKED_CONTEXT: &str = "forked";

const KEYWORD_PREFIXES: &[&str] =
	&["file:", "f:", "-file:", "-f:", "lang:", "l:", "sym:", "case:", "repo:", "branch:", "b:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SearchLevel {
	Project,
	Group,
	Global,
}
impl SearchLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Project => "project",
			Self::Group => "group",
			Self::Global => "global",
		}
	}
}
impl FromStr for SearchLevel {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		match raw.trim() {
			"project" => Ok(Self::Project),
			"group" => Ok(Self::Group),
			"global" => Ok(Self::Global),
			other => Err(Error::UnsupportedSearchLevel(other.to_string())),
		}
	}
}
impl TryFrom<String> for SearchLevel {
	type Error = Error;

	fn try_from(raw: String) -> Result<Self> {
		raw.parse()
	}
}
impl fmt::Display for SearchLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
	#[default]
	Exact,
	Regex,
}
impl SearchMode {
	/// Absent, `false` and `"false"` select exact matching; `true` and `"true"` select regex.
	pub fn from_flag(flag: Option<&RegexFlag>) -> Self {
		match flag {
			Some(RegexFlag::Bool(true)) => Self::Regex,
			Some(RegexFlag::Text(text)) if text.trim().eq_ignore_ascii_case("true") => Self::Regex,
			_ => Self::Exact,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Exact => "exact",
			Self::Regex => "regex",
		}
	}
}

/// The regex toggle as callers send it: either a JSON boolean or its string spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegexFlag {
	Bool(bool),
	Text(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
	pub include_archived: bool,
	pub include_forked: bool,
}
impl SearchFilters {
	/// Filter names and values in a stable order, for fingerprints.
	pub fn sorted(&self) -> BTreeMap<&'static str, bool> {
		BTreeMap::from([
			("include_archived", self.include_archived),
			("include_forked", self.include_forked),
		])
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
	Project(u64),
	Group(GroupScope),
	Global,
}
impl Scope {
	pub fn level(&self) -> SearchLevel {
		match self {
			Self::Project(_) => SearchLevel::Project,
			Self::Group(_) => SearchLevel::Group,
			Self::Global => SearchLevel::Global,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupScope {
	/// Formatted traversal prefix of the group, see [`filters::format_traversal_ids`].
	TraversalIds(String),
	/// Explicit allow-list of the group's project ids.
	ProjectIds(Vec<u64>),
}

#[derive(Debug, Clone)]
pub struct QueryOptions<'a> {
	pub scope: &'a Scope,
	pub mode: SearchMode,
	pub filters: SearchFilters,
	pub access: &'a ActorAccess,
	pub policy: FeaturePolicy,
}

pub fn build_query(text: &str, options: &QueryOptions<'_>) -> Result<QueryNode> {
	let text_filter = by_query_string(&formatted_query(text, options.mode))?;
	let mut children = Vec::with_capacity(5);

	children.push(text_filter.with_context(QUERY_STRING_CONTEXT));

	if let Some(scoping) = scope_filter(options.scope)? {
		children.push(scoping);
	}
	if !options.filters.include_archived {
		children.push(not_filter(by_meta(META_ARCHIVED, "^t$")?).with_context(ARCHIVED_CONTEXT));
	}
	if !options.filters.include_forked {
		children.push(not_filter(by_meta(META_FORKED, "^t$")?).with_context(FORKED_CONTEXT));
	}
	if options.scope.level() != SearchLevel::Project {
		children.push(access::build_access_branches(options.access, &options.policy)?);
	}

	filters::and_filters(children)
}

pub fn scope_filter(scope: &Scope) -> Result<Option<QueryNode>> {
	let node = match scope {
		Scope::Project(project_id) if *project_id <= MAX_REPO_ID =>
			by_repo_ids(&[*project_id])?.with_context(REPO_IDS_CONTEXT),
		Scope::Project(project_id) => by_project_id(*project_id)?.with_context(PROJECT_ID_CONTEXT),
		Scope::Group(GroupScope::TraversalIds(prefix)) =>
			by_traversal_ids(std::slice::from_ref(prefix))?.with_context(TRAVERSAL_IDS_CONTEXT),
		Scope::Group(GroupScope::ProjectIds(project_ids)) =>
			by_project_scope(project_ids)?.with_context(REPO_IDS_CONTEXT),
		Scope::Global => return Ok(None),
	};

	Ok(Some(node))
}

/// Rewrites caller text for the backend query language.
///
/// Regex mode passes text through. Exact mode escapes the free text as one literal phrase and
/// keeps recognised `keyword:value` terms after it untouched.
pub fn formatted_query(text: &str, mode: SearchMode) -> String {
	let text = text.trim();

	if mode == SearchMode::Regex {
		return text.to_string();
	}

	let mut phrase = Vec::new();
	let mut keywords = Vec::new();

	for term in text.split_whitespace() {
		if KEYWORD_PREFIXES.iter().any(|prefix| term.len() > prefix.len() && term.starts_with(prefix))
		{
			keywords.push(term);
		} else {
			phrase.push(term);
		}
	}

	let mut out = String::new();

	if !phrase.is_empty() {
		let escaped = regex::escape(&phrase.join(" "));

		if phrase.len() > 1 {
			out.push('"');
			out.push_str(&escaped.replace('"', "\\\""));
			out.push('"');
		} else {
			out.push_str(&escaped);
		}
	}

	for keyword in keywords {
		if !out.is_empty() {
			out.push(' ');
		}

		out.push_str(keyword);
	}

	out
}
