use super::stack_owner_reference;
use crate::container::{StackContainer, StackSetContainer};
use crate::domain::{
    ANNOTATION_BACKEND_WEIGHTS, ANNOTATION_STACK_TRAFFIC_WEIGHTS,
};
use crate::errors::*;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec as K8sIngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Per-Stack ingress (spec §4.4): one rule per host, each host rewritten
/// as `<stackName>.<originalHost>`, backed by the per-Stack Service.
/// Returns `None` when the Stack has no ingress spec at all.
pub fn generate_per_stack(sc: &StackContainer) -> Option<Ingress> {
    let ingress_spec = sc.ingress_spec.as_ref()?;

    let rules: Vec<IngressRule> = ingress_spec
        .hosts
        .iter()
        .map(|host| IngressRule {
            host: Some(format!("{}.{}", sc.name(), host)),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: ingress_spec.path.clone(),
                    path_type: "ImplementationSpecific".to_string(),
                    backend: service_backend(sc.name(), &ingress_spec.backend_port),
                }],
            }),
        })
        .collect();

    Some(Ingress {
        metadata: ObjectMeta {
            name: Some(sc.name().to_string()),
            namespace: sc.stack.metadata.namespace.clone(),
            labels: sc.stack.metadata.labels.clone(),
            annotations: ingress_spec.annotations.clone(),
            owner_references: Some(vec![stack_owner_reference(&sc.stack)]),
            ..Default::default()
        },
        spec: Some(K8sIngressSpec {
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn service_backend(
    service_name: &str,
    backend_port: &crate::domain::stackset::IngressBackendPort,
) -> IngressBackend {
    use crate::domain::stackset::IngressBackendPort;
    let port = match backend_port {
        IngressBackendPort::Number(n) => ServiceBackendPort {
            number: Some(*n),
            ..Default::default()
        },
        IngressBackendPort::Name(name) => ServiceBackendPort {
            name: Some(name.clone()),
            ..Default::default()
        },
    };
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service_name.to_string(),
            port: Some(port),
        }),
        ..Default::default()
    }
}

/// Shared ingress (spec §4.4): one path per Stack with positive actual
/// traffic weight, sorted by service name for stable output. Fails with
/// `ErrorKind::NoPaths` if no Stack currently carries positive actual
/// weight.
pub fn generate_shared(container: &StackSetContainer) -> Result<Ingress> {
    let ingress_spec = container
        .stackset
        .spec
        .ingress
        .as_ref()
        .ok_or_else(|| Error::from("shared ingress requested but StackSet has no ingress spec"))?;

    let mut serving: Vec<&crate::container::StackContainer> = container
        .live_stacks()
        .filter(|s| s.actual_traffic_weight > 0.0)
        .collect();

    if serving.is_empty() {
        bail!(ErrorKind::NoPaths);
    }

    serving.sort_by(|a, b| a.name().cmp(b.name()));

    let paths: Vec<HTTPIngressPath> = serving
        .iter()
        .map(|sc| HTTPIngressPath {
            path: ingress_spec.path.clone(),
            path_type: "ImplementationSpecific".to_string(),
            backend: service_backend(sc.name(), &ingress_spec.backend_port),
        })
        .collect();

    let rules: Vec<IngressRule> = if ingress_spec.hosts.is_empty() {
        vec![IngressRule {
            host: None,
            http: Some(HTTPIngressRuleValue { paths }),
        }]
    } else {
        ingress_spec
            .hosts
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue { paths: paths.clone() }),
            })
            .collect()
    };

    let mut annotations: BTreeMap<String, String> = ingress_spec.annotations.clone().unwrap_or_default();
    annotations.insert(
        ANNOTATION_BACKEND_WEIGHTS.to_string(),
        serde_json::to_string(&weight_map(container, true))?,
    );
    annotations.insert(
        ANNOTATION_STACK_TRAFFIC_WEIGHTS.to_string(),
        serde_json::to_string(&weight_map(container, false))?,
    );

    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(container.name().to_string()),
            namespace: Some(container.namespace().to_string()),
            annotations: Some(annotations),
            owner_references: Some(vec![stackset_owner_reference(container)]),
            ..Default::default()
        },
        spec: Some(K8sIngressSpec {
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Only Stacks with positive weight are included; missing implies zero
/// (spec §6).
fn weight_map(container: &StackSetContainer, actual: bool) -> BTreeMap<String, f64> {
    container
        .live_stacks()
        .filter_map(|s| {
            let w = if actual {
                s.actual_traffic_weight
            } else {
                s.desired_traffic_weight
            };
            (w > 0.0).then(|| (s.name().to_string(), w))
        })
        .collect()
}

fn stackset_owner_reference(container: &StackSetContainer) -> OwnerReference {
    use crate::domain::StackSet;
    use kube::{Resource, ResourceExt};
    OwnerReference {
        api_version: StackSet::api_version(&()).to_string(),
        kind: StackSet::kind(&()).to_string(),
        name: container.stackset.name_any(),
        uid: container.stackset.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
