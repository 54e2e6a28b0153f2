use crate::{reconcile::condition, DesiredStatus};
use std::collections::BTreeSet;
use trellis_controller_collections::{Collection, HandlerContext};
use trellis_controller_core::{
    conditions::{self, errors_message, reasons},
    ir::{PolicyKind, PolicyTargetRef, PolicyWrapper},
    merge::MergeOrigins,
    ObjectSource, GATEWAY_API_GROUP,
};
use trellis_controller_k8s_api::policy::{ParentReference, PolicyAncestorStatus, PolicyStatus};
use trellis_controller_k8s_index::Pipeline;

/// Derives the status of every policy of `kind`, reporting for each target
/// which of the policy's fields took effect there.
pub fn policy_statuses(
    pipeline: &Pipeline,
    kind: PolicyKind,
) -> Collection<DesiredStatus<PolicyStatus>> {
    let name = format!("{}-statuses", kind.kind_name().to_ascii_lowercase());
    let policies = pipeline.policies.all.clone();
    let pipeline = pipeline.clone();
    policies.derive_one(name, move |ctx, policy| {
        if policy.policy.kind() != kind {
            return None;
        }
        let ancestors = policy
            .target_refs
            .iter()
            .map(|target| {
                let applied = applied_fields(ctx, &pipeline, policy, target);
                ancestor_status(&pipeline.config.controller_name, policy, target, applied)
            })
            .collect();
        Some(DesiredStatus::new(&policy.source, PolicyStatus { ancestors }))
    })
}

/// Builds a policy's status for one target, given the fields it set there or
/// `None` if the target does not exist.
pub fn ancestor_status(
    controller_name: &str,
    policy: &PolicyWrapper,
    target: &PolicyTargetRef,
    applied: Option<BTreeSet<String>>,
) -> PolicyAncestorStatus {
    let generation = policy.generation;
    let kind = policy.policy.kind().kind_name();
    let accepted = if let Some(message) = errors_message(kind, &policy.errors) {
        condition(
            conditions::ACCEPTED,
            false,
            reasons::INVALID,
            message,
            generation,
        )
    } else {
        match applied {
            None => condition(
                conditions::ACCEPTED,
                false,
                reasons::TARGET_NOT_FOUND,
                format!(
                    "{} {}/{} not found",
                    target.kind, policy.source.namespace, target.name
                ),
                generation,
            ),
            Some(fields) if fields.is_empty() => condition(
                conditions::ACCEPTED,
                false,
                reasons::CONFLICTED,
                "every field is overridden by a higher-priority policy",
                generation,
            ),
            Some(fields) => condition(
                conditions::ACCEPTED,
                true,
                reasons::ACCEPTED,
                format!(
                    "applied {}",
                    fields.into_iter().collect::<Vec<_>>().join(", ")
                ),
                generation,
            ),
        }
    };

    PolicyAncestorStatus {
        ancestor_ref: ParentReference {
            group: Some(target.group.clone()),
            kind: Some(target.kind.clone()),
            namespace: Some(policy.source.namespace.clone()),
            name: target.name.clone(),
            section_name: target.section_name.clone(),
            port: None,
        },
        controller_name: controller_name.to_string(),
        conditions: vec![accepted],
    }
}

/// The fields `policy` set on `target`, read from the merge provenance
/// recorded on the target's IR. `None` if the target does not exist.
fn applied_fields(
    ctx: &mut HandlerContext<'_>,
    pipeline: &Pipeline,
    policy: &PolicyWrapper,
    target: &PolicyTargetRef,
) -> Option<BTreeSet<String>> {
    let source = ObjectSource::new(
        target.group.clone(),
        target.kind.clone(),
        policy.source.namespace.clone(),
        target.name.clone(),
    );
    let in_section = |name: Option<&str>| {
        target.section_name.is_none() || target.section_name.as_deref() == name
    };

    let mut fields = BTreeSet::new();
    if source.is_kind(GATEWAY_API_GROUP, "Gateway") {
        let gateway = ctx.fetch_one(&pipeline.gateways, &source.key())?;
        for listener in gateway.listeners.iter().filter(|l| in_section(Some(l.name.as_str()))) {
            collect(&mut fields, &policy.source, &listener.policy_origins);
            collect(&mut fields, &policy.source, &listener.traffic_origins);
        }
    } else if source.is_kind(GATEWAY_API_GROUP, "HTTPRoute") {
        let route = ctx.fetch_one(&pipeline.routes.routes, &source.key())?;
        for rule in route.rules.iter().filter(|r| in_section(r.name.as_deref())) {
            collect(&mut fields, &policy.source, &rule.origins);
        }
    } else {
        let backends = pipeline.backends.lookup(ctx, &source);
        if backends.is_empty() {
            return None;
        }
        for backend in &backends {
            collect(&mut fields, &policy.source, &backend.origins);
        }
    }
    Some(fields)
}

fn collect(fields: &mut BTreeSet<String>, policy: &ObjectSource, origins: &MergeOrigins) {
    fields.extend(
        origins
            .iter()
            .filter(|(_, origin)| origin.source == *policy)
            .map(|(field, _)| field.to_string()),
    );
}
