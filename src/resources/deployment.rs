use super::{stack_generation_annotations, stack_owner_reference, stack_selector_labels};
use crate::container::StackContainer;
use crate::replicas::ReplicaDecision;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

/// Generates the desired Deployment for a Stack (spec §4.4).
///
/// `decision.deployment_replicas == None` means "leave replicas unset" —
/// the generated object omits the field entirely so a server-side-apply
/// patch never clobbers whatever an HPA has set (spec §4.3).
pub fn generate(sc: &StackContainer, decision: ReplicaDecision) -> Deployment {
    let selector = stack_selector_labels(sc);
    let mut template = sc.stack.spec.pod_template.clone();
    let mut template_labels = template.metadata.clone().unwrap_or_default().labels.unwrap_or_default();
    for (k, v) in &selector {
        template_labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let mut template_meta = template.metadata.unwrap_or_default();
    template_meta.labels = Some(template_labels);
    template.metadata = Some(template_meta);

    Deployment {
        metadata: ObjectMeta {
            name: Some(sc.name().to_string()),
            namespace: sc.stack.metadata.namespace.clone(),
            labels: sc.stack.metadata.labels.clone(),
            annotations: Some(stack_generation_annotations(&sc.stack)),
            owner_references: Some(vec![stack_owner_reference(&sc.stack)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: decision.deployment_replicas,
            selector: LabelSelector {
                match_labels: Some(selector),
                match_expressions: None,
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stack, StackSpec};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta as Meta, Time};
    use std::collections::BTreeMap;

    fn sc() -> StackContainer {
        let mut labels = BTreeMap::new();
        labels.insert("stackset".to_string(), "foo".to_string());
        labels.insert("stack-version".to_string(), "v1".to_string());

        let mut s = Stack::new(
            "foo-v1",
            StackSpec {
                pod_template: PodTemplateSpec::default(),
                replicas: Some(3),
                service_ports: None,
                autoscaler: None,
                horizontal_pod_autoscaler: None,
            },
        );
        s.metadata = Meta {
            name: Some("foo-v1".into()),
            namespace: Some("default".into()),
            labels: Some(labels),
            creation_timestamp: Some(Time("2024-01-01T00:00:00Z".parse().unwrap())),
            ..Default::default()
        };

        StackContainer {
            stack: s,
            deployment_replicas: None,
            created_replicas: None,
            ready_replicas: None,
            updated_replicas: None,
            desired_replicas: None,
            hpa_min_replicas: None,
            actual_traffic_weight: 0.0,
            desired_traffic_weight: 0.0,
            no_traffic_since: None,
            prescaling_active: false,
            prescaling_replicas: 0,
            prescaling_desired_traffic_weight: 0.0,
            prescaling_last_traffic_increase: None,
            ingress_spec: None,
            pending_removal: false,
        }
    }

    #[test]
    fn selector_is_subset_of_template_labels() {
        let container = sc();
        let decision = ReplicaDecision {
            deployment_replicas: Some(3),
            hpa_min_replicas: None,
        };
        let deploy = generate(&container, decision);
        let spec = deploy.spec.unwrap();
        let selector_labels = spec.selector.match_labels.unwrap();
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        for (k, v) in &selector_labels {
            assert_eq!(template_labels.get(k), Some(v));
        }
        assert_eq!(spec.replicas, Some(3));
    }

    #[test]
    fn unset_replicas_are_omitted() {
        let container = sc();
        let decision = ReplicaDecision::default();
        let deploy = generate(&container, decision);
        assert_eq!(deploy.spec.unwrap().replicas, None);
    }
}
