//! Access branches: one disjunct per path by which an actor may read a project's repository.

use serde::{Deserialize, Serialize};

use crate::{
	Result,
	filters::{
		self, META_REPOSITORY_ACCESS_LEVEL, META_VISIBILITY_LEVEL, QueryNode, by_meta,
		by_project_scope, by_traversal_ids,
	},
};

pub const ACCESS_BRANCHES: &str = "access_branches";
pub const ADMIN_BRANCH: &str = "admin_branch";
pub const PUBLIC_AND_INTERNAL_BRANCH: &str = "public_and_internal_branch";
pub const PUBLIC_AND_INTERNAL_AUTHORIZED_BRANCH: &str = "public_and_internal_authorized_branch";
pub const PRIVATE_AUTHORIZED_BRANCH: &str = "private_authorized_branch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
	NoAccess,
	Guest,
	Reporter,
	Developer,
	Maintainer,
	Owner,
}
impl AccessLevel {
	pub fn as_i32(self) -> i32 {
		match self {
			Self::NoAccess => 0,
			Self::Guest => 10,
			Self::Reporter => 20,
			Self::Developer => 30,
			Self::Maintainer => 40,
			Self::Owner => 50,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
	Private,
	Internal,
	Public,
}
impl Visibility {
	pub fn level(self) -> u8 {
		match self {
			Self::Private => 0,
			Self::Internal => 10,
			Self::Public => 20,
		}
	}
}

/// Access level configured on the project feature itself (disabled, members only, everyone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureAccess {
	Disabled,
	Private,
	Enabled,
}
impl FeatureAccess {
	pub fn level(self) -> u8 {
		match self {
			Self::Disabled => 0,
			Self::Private => 10,
			Self::Enabled => 20,
		}
	}
}

/// Minimum membership needed to read a feature, split by project visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturePolicy {
	pub feature: &'static str,
	pub public_and_internal: AccessLevel,
	pub private: AccessLevel,
}
impl FeaturePolicy {
	pub const fn repository() -> Self {
		Self {
			feature: "repository",
			public_and_internal: AccessLevel::Guest,
			private: AccessLevel::Reporter,
		}
	}

	pub fn max_level(&self) -> AccessLevel {
		self.public_and_internal.max(self.private)
	}
}

/// What the authorization provider answered for one actor, flattened into plain sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorAccess {
	pub bypass: bool,
	pub anonymous: bool,
	pub guest_project_ids: Vec<u64>,
	pub reporter_project_ids: Vec<u64>,
	pub guest_group_prefixes: Vec<String>,
	pub reporter_group_prefixes: Vec<String>,
	pub custom_role_project_ids: Vec<u64>,
	pub custom_role_group_prefixes: Vec<String>,
}
impl ActorAccess {
	pub fn anonymous() -> Self {
		Self { anonymous: true, ..Self::default() }
	}

	pub fn admin() -> Self {
		Self { bypass: true, ..Self::default() }
	}

	fn has_guest_access(&self) -> bool {
		!self.guest_project_ids.is_empty() || !self.guest_group_prefixes.is_empty()
	}

	fn has_private_access(&self) -> bool {
		!self.reporter_project_ids.is_empty()
			|| !self.reporter_group_prefixes.is_empty()
			|| !self.custom_role_project_ids.is_empty()
			|| !self.custom_role_group_prefixes.is_empty()
	}
}

/// Builds the `or` of every branch the actor qualifies for, labelled [`ACCESS_BRANCHES`].
///
/// Never fails closed: an actor with no memberships still receives the public/internal branch.
pub fn build_access_branches(access: &ActorAccess, policy: &FeaturePolicy) -> Result<QueryNode> {
	let mut branches = Vec::new();

	if access.bypass {
		branches.push(admin_branch(policy)?);
	} else if access.anonymous {
		branches.push(public_branch(&[Visibility::Public])?);
	} else {
		branches.push(public_branch(&[Visibility::Internal, Visibility::Public])?);

		if access.has_guest_access() {
			branches.push(public_and_internal_authorized_branch(access)?);
		}
		if access.has_private_access() {
			branches.push(private_authorized_branch(access)?);
		}
	}

	Ok(filters::or_filters(branches)?.with_context(ACCESS_BRANCHES))
}

fn admin_branch(policy: &FeaturePolicy) -> Result<QueryNode> {
	// Bypass actors hold the highest level any visibility demands, so members-only features are
	// readable too whenever the policy grants them to anyone at all.
	let levels: &[FeatureAccess] = if policy.max_level() > AccessLevel::NoAccess {
		&[FeatureAccess::Private, FeatureAccess::Enabled]
	} else {
		&[FeatureAccess::Enabled]
	};

	Ok(feature_filter(levels)?.with_context(ADMIN_BRANCH))
}

fn public_branch(visibility: &[Visibility]) -> Result<QueryNode> {
	let branch = filters::and_filters(vec![
		visibility_filter(visibility)?,
		feature_filter(&[FeatureAccess::Enabled])?,
	])?;

	Ok(branch.with_context(PUBLIC_AND_INTERNAL_BRANCH))
}

fn public_and_internal_authorized_branch(access: &ActorAccess) -> Result<QueryNode> {
	let membership = membership_filter(&access.guest_project_ids, &access.guest_group_prefixes)?;
	let branch = filters::and_filters(vec![
		visibility_filter(&[Visibility::Internal, Visibility::Public])?,
		feature_filter(&[FeatureAccess::Private])?,
		membership,
	])?;

	Ok(branch.with_context(PUBLIC_AND_INTERNAL_AUTHORIZED_BRANCH))
}

fn private_authorized_branch(access: &ActorAccess) -> Result<QueryNode> {
	let project_ids = merged(&access.reporter_project_ids, &access.custom_role_project_ids);
	let prefixes = merged(&access.reporter_group_prefixes, &access.custom_role_group_prefixes);
	let branch = filters::and_filters(vec![
		feature_filter(&[FeatureAccess::Private, FeatureAccess::Enabled])?,
		membership_filter(&project_ids, &prefixes)?,
	])?;

	Ok(branch.with_context(PRIVATE_AUTHORIZED_BRANCH))
}

fn membership_filter(project_ids: &[u64], prefixes: &[String]) -> Result<QueryNode> {
	let mut alternatives = Vec::with_capacity(2);

	if !project_ids.is_empty() {
		alternatives.push(by_project_scope(project_ids)?);
	}
	if !prefixes.is_empty() {
		alternatives.push(by_traversal_ids(prefixes)?);
	}
	if alternatives.len() == 1 {
		return Ok(alternatives.remove(0));
	}

	filters::or_filters(alternatives)
}

fn visibility_filter(levels: &[Visibility]) -> Result<QueryNode> {
	let values: Vec<String> = levels.iter().map(|level| level.level().to_string()).collect();

	by_meta(META_VISIBILITY_LEVEL, &anchored_alternation(&values))
}

fn feature_filter(levels: &[FeatureAccess]) -> Result<QueryNode> {
	let mut values: Vec<String> = levels.iter().map(|level| level.level().to_string()).collect();

	values.dedup();

	by_meta(META_REPOSITORY_ACCESS_LEVEL, &anchored_alternation(&values))
}

fn anchored_alternation(values: &[String]) -> String {
	if values.len() == 1 { format!("^{}$", values[0]) } else { format!("^({})$", values.join("|")) }
}

fn merged<T>(left: &[T], right: &[T]) -> Vec<T>
where
	T: Clone + Ord,
{
	let mut out: Vec<T> = left.iter().chain(right).cloned().collect();

	out.sort();
	out.dedup();

	out
}
