use super::stackset::{StackAutoscalerSpec, StackTemplate};
use chrono::{DateTime, Utc};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerSpec;
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServicePort};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One immutable version of a StackSet's application (spec §3).
///
/// The spec itself never changes after creation (spec §3 "Stack mutation");
/// only `status` and the downstream resources owned by a Stack change
/// across reconciliations.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    group = "zalando.org",
    version = "v1",
    kind = "Stack",
    status = "StackStatus",
    shortname = "stk",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    pub pod_template: PodTemplateSpec,
    pub replicas: Option<i32>,
    #[serde(default)]
    pub service_ports: Option<Vec<ServicePort>>,
    #[serde(default)]
    pub autoscaler: Option<StackAutoscalerSpec>,
    #[serde(default)]
    pub horizontal_pod_autoscaler: Option<HorizontalPodAutoscalerSpec>,
}

impl From<&StackTemplate> for StackSpec {
    fn from(t: &StackTemplate) -> Self {
        StackSpec {
            pod_template: t.pod_template.clone(),
            replicas: t.replicas,
            service_ports: t.service_ports.clone(),
            autoscaler: t.autoscaler.clone(),
            horizontal_pod_autoscaler: t.horizontal_pod_autoscaler.clone(),
        }
    }
}

impl StackSpec {
    /// Spec §4.2 `IsAutoscaled`: either autoscaler flavor counts.
    pub fn is_autoscaled(&self) -> bool {
        self.autoscaler.is_some() || self.horizontal_pod_autoscaler.is_some()
    }
}

/// Per-Stack status, rolled up by the Status Aggregator (spec §4.5) and
/// re-read on the next tick to rehydrate the stateful parts of
/// `StackContainer` (`noTrafficSince`, the prescaling fields) that have no
/// other home between reconciliations (spec §9 "Global state").
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    pub actual_traffic_weight: f64,
    pub desired_traffic_weight: f64,

    pub replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    pub updated_replicas: Option<i32>,
    pub desired_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_traffic_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescaling: Option<PrescalingStatus>,
}

/// Populated only while `prescalingActive` (spec §4.5).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrescalingStatus {
    pub active: bool,
    pub replicas: i32,
    pub desired_traffic_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_traffic_increase: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_autoscaled_true_for_either_flavor() {
        let mut s = StackSpec {
            pod_template: Default::default(),
            replicas: Some(1),
            service_ports: None,
            autoscaler: None,
            horizontal_pod_autoscaler: None,
        };
        assert!(!s.is_autoscaled());

        s.autoscaler = Some(StackAutoscalerSpec {
            min_replicas: Some(1),
            max_replicas: 3,
            metrics: vec![],
        });
        assert!(s.is_autoscaled());
    }
}
