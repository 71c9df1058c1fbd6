use lode_domain::access::{ActorAccess, FeaturePolicy};

use crate::{AuthorizationProvider, Result};

/// Flattens what the provider knows about `actor_id` into an [`ActorAccess`].
///
/// `None` is the anonymous actor. A bypass actor skips the membership lookups.
pub async fn resolve_actor_access(
	provider: &dyn AuthorizationProvider,
	actor_id: Option<u64>,
	policy: &FeaturePolicy,
) -> Result<ActorAccess> {
	let Some(actor_id) = actor_id else {
		return Ok(ActorAccess::anonymous());
	};

	if provider.can_bypass(actor_id).await? {
		tracing::debug!(actor_id, "Actor bypasses access branches.");

		return Ok(ActorAccess::admin());
	}

	let access = ActorAccess {
		bypass: false,
		anonymous: false,
		guest_project_ids: provider.project_ids_at(actor_id, policy.public_and_internal).await?,
		reporter_project_ids: provider.project_ids_at(actor_id, policy.private).await?,
		guest_group_prefixes: provider.group_prefixes_at(actor_id, policy.public_and_internal).await?,
		reporter_group_prefixes: provider.group_prefixes_at(actor_id, policy.private).await?,
		custom_role_project_ids: provider.custom_role_project_ids(actor_id).await?,
		custom_role_group_prefixes: provider.custom_role_group_prefixes(actor_id).await?,
	};

	tracing::debug!(
		actor_id,
		guest_projects = access.guest_project_ids.len(),
		reporter_projects = access.reporter_project_ids.len(),
		guest_groups = access.guest_group_prefixes.len(),
		reporter_groups = access.reporter_group_prefixes.len(),
		"Resolved actor access."
	);

	Ok(access)
}
