//! Resource Generator (spec §4.4): pure functions from a `StackContainer`
//! (or the whole `StackSetContainer`, for the shared ingress) to a desired
//! downstream object. One file per kind.

pub mod autoscaler;
pub mod deployment;
pub mod ingress;
pub mod service;

use crate::container::StackContainer;
use crate::domain::{Stack, ANNOTATION_STACK_GENERATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Owner reference pointing at the Stack, used by every per-Stack
/// generated resource (spec §4.4 "Ownership").
pub fn stack_owner_reference(stack: &Stack) -> OwnerReference {
    OwnerReference {
        api_version: Stack::api_version(&()).to_string(),
        kind: Stack::kind(&()).to_string(),
        name: stack.name_any(),
        uid: stack.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// `stack-generation` annotation (spec §4.4, §6): a cheap "did spec
/// change?" check for the external reconciler.
pub fn stack_generation_annotations(stack: &Stack) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_STACK_GENERATION.to_string(),
        stack.metadata.generation.unwrap_or(0).to_string(),
    );
    annotations
}

/// Selector labels actually present on the Stack object — the `stackset`
/// and `stack-version` pair set at creation time (spec §3). Generators
/// use this rather than re-deriving the pair, so a Stack created before a
/// label-scheme change still gets consistent selectors.
pub fn stack_selector_labels(sc: &StackContainer) -> BTreeMap<String, String> {
    let labels = sc.stack.metadata.labels.clone().unwrap_or_default();
    let mut out = BTreeMap::new();
    for key in [crate::domain::LABEL_STACKSET, crate::domain::LABEL_STACK_VERSION] {
        if let Some(v) = labels.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    out
}
