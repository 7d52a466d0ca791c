//! Lifecycle Decider (spec §4.1): whether a new Stack must be
//! materialized, and which existing Stacks are eligible for garbage
//! collection.

use crate::container::StackSetContainer;
use crate::domain::{Stack, StackSet, StackSpec};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// New-stack rule (spec §4.1).
///
/// Returns `Some(stack)` when the current template version has no
/// matching Stack in the working set *and* the StackSet has not already
/// observed that version — the two-predicate check that stops a
/// user-deleted Stack from being recreated. The caller persists the
/// returned Stack and only then bumps `status.observedStackVersion`
/// (spec §4.1 "The caller is responsible for...").
pub fn decide_new_stack(container: &StackSetContainer) -> Option<Stack> {
    let stackset = &container.stackset;
    let version = stackset.spec.current_version();
    let stack_name = stackset.spec.stack_name(container.name());

    if container.find(&stack_name).is_some() {
        return None;
    }
    if stackset.status.as_ref().and_then(|s| s.observed_stack_version.as_deref()) == Some(version.as_str())
    {
        return None;
    }

    Some(new_stack(stackset, &stack_name))
}

fn new_stack(stackset: &StackSet, stack_name: &str) -> Stack {
    let mut spec = StackSpec::from(&stackset.spec.stack_template);
    spec.service_ports = spec.service_ports.map(default_port_protocols);

    let mut stack = Stack::new(stack_name, spec);
    stack.metadata.namespace = stackset.metadata.namespace.clone();
    stack.metadata.labels = Some(super::container::selector_labels(
        container_name(stackset),
        &stackset.spec.current_version(),
    ));
    stack.metadata.owner_references = Some(vec![owner_reference(stackset)]);
    stack
}

fn container_name(stackset: &StackSet) -> &str {
    stackset.metadata.name.as_deref().unwrap_or_default()
}

/// Any service port missing a protocol defaults to TCP (spec §4.1).
fn default_port_protocols(ports: Vec<ServicePort>) -> Vec<ServicePort> {
    ports
        .into_iter()
        .map(|mut p| {
            if p.protocol.is_none() {
                p.protocol = Some("TCP".to_string());
            }
            p
        })
        .collect()
}

fn owner_reference(stackset: &StackSet) -> OwnerReference {
    OwnerReference {
        api_version: StackSet::api_version(&()).to_string(),
        kind: StackSet::kind(&()).to_string(),
        name: stackset.name_any(),
        uid: stackset.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Garbage-collection rule (spec §4.1).
///
/// Marks the oldest excess candidates `PendingRemoval` in place. A
/// candidate is any live Stack with no ingress exposure or that is
/// currently `ScaledDown`; Stacks outside that set are never touched
/// regardless of age.
pub fn mark_pending_removal(container: &mut StackSetContainer, now: DateTime<Utc>) {
    let limit = container.stackset.spec.lifecycle().limit();
    let ttl = container.stackset.spec.lifecycle().scaledown_ttl_seconds();

    let mut candidate_names: Vec<(String, Option<DateTime<Utc>>)> = container
        .live_stacks()
        .filter(|s| s.is_gc_candidate(now, ttl))
        .map(|s| (s.name().to_string(), s.creation_timestamp()))
        .collect();

    if candidate_names.len() as i32 <= limit {
        return;
    }

    // Oldest first; spec §9 keeps creation-timestamp ordering rather than
    // `noTrafficSince` (open question (a), resolved in DESIGN.md).
    candidate_names.sort_by_key(|(_, ts)| *ts);

    let excess = candidate_names.len() - limit.max(0) as usize;
    for (name, _) in candidate_names.into_iter().take(excess) {
        if let Some(sc) = container.find_mut(&name) {
            sc.pending_removal = true;
        }
    }
}
