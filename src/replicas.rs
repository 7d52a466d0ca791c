//! Replica Planner (spec §4.3): per-Stack deployment replica decision and
//! HPA `minReplicas` clamp.

use crate::container::{StackContainer, StackSetContainer};
use chrono::{DateTime, Utc};

/// What the Resource Generator should write for one Stack's replica
/// counts. `None` means "leave it as the downstream autoscaler or
/// existing value stands" (spec §4.3) — the unset/zero distinction from
/// spec §9 "Optional numbers" is preserved all the way through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicaDecision {
    pub deployment_replicas: Option<i32>,
    pub hpa_min_replicas: Option<i32>,
}

/// Deployment-replicas decision (spec §4.3).
pub fn plan_replicas(
    sc: &StackContainer,
    now: DateTime<Utc>,
    scaledown_ttl_seconds: i64,
) -> ReplicaDecision {
    let desired = if sc.prescaling_active {
        sc.prescaling_replicas
    } else {
        sc.stack_replicas().unwrap_or(0)
    };
    let scaled_down = sc.scaled_down(now, scaledown_ttl_seconds);
    let current = sc.deployment_replicas.unwrap_or(0);

    let deployment_replicas = if desired != 0 && !scaled_down {
        if current == 0 {
            Some(desired)
        } else if !sc.is_autoscaled() && desired != current {
            Some(desired)
        } else {
            None
        }
    } else if current != 0 {
        Some(0)
    } else {
        None
    };

    // HPA min-replicas clamp (spec §4.3): while prescaling, raise
    // minReplicas to at least prescalingReplicas.
    let hpa_min_replicas = if sc.prescaling_active {
        match sc.hpa_min_replicas {
            Some(min) if min >= sc.prescaling_replicas => None,
            _ => Some(sc.prescaling_replicas),
        }
    } else {
        None
    };

    ReplicaDecision {
        deployment_replicas,
        hpa_min_replicas,
    }
}

/// Runs the planner over every live Stack in the working set, returning
/// one decision per Stack name.
pub fn plan_all(container: &StackSetContainer, now: DateTime<Utc>) -> Vec<(String, ReplicaDecision)> {
    let ttl = container.stackset.spec.lifecycle().scaledown_ttl_seconds();
    container
        .live_stacks()
        .map(|sc| (sc.name().to_string(), plan_replicas(sc, now, ttl)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stack, StackSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn container(stack_replicas: i32) -> StackContainer {
        let mut s = Stack::new(
            "foo-v1",
            StackSpec {
                pod_template: Default::default(),
                replicas: Some(stack_replicas),
                service_ports: None,
                autoscaler: None,
                horizontal_pod_autoscaler: None,
            },
        );
        s.metadata = ObjectMeta {
            name: Some("foo-v1".into()),
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
    fn writes_desired_when_deployment_is_at_zero() {
        let sc = container(3);
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, Some(3));
    }

    #[test]
    fn refuses_to_overwrite_autoscaled_replicas_while_live() {
        let mut sc = container(3);
        sc.deployment_replicas = Some(5);
        sc.stack.spec.autoscaler = Some(crate::domain::stackset::StackAutoscalerSpec {
            min_replicas: Some(1),
            max_replicas: 10,
            metrics: vec![],
        });
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, None);
    }

    #[test]
    fn overwrites_non_autoscaled_mismatch() {
        let mut sc = container(3);
        sc.deployment_replicas = Some(5);
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, Some(3));
    }

    #[test]
    fn scaled_down_stack_gets_zeroed() {
        let mut sc = container(3);
        sc.deployment_replicas = Some(3);
        sc.no_traffic_since = Some("2024-01-01T00:00:00Z".parse().unwrap());
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, Some(0));
    }

    #[test]
    fn already_zeroed_scaled_down_stack_is_left_alone() {
        let mut sc = container(3);
        sc.deployment_replicas = Some(0);
        sc.no_traffic_since = Some("2024-01-01T00:00:00Z".parse().unwrap());
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, None);
    }

    #[test]
    fn prescaling_drives_desired_and_clamps_hpa_min() {
        let mut sc = container(3);
        sc.prescaling_active = true;
        sc.prescaling_replicas = 5;
        sc.deployment_replicas = Some(0);
        sc.hpa_min_replicas = Some(1);
        let now = "2024-01-01T00:10:00Z".parse().unwrap();
        let d = plan_replicas(&sc, now, 300);
        assert_eq!(d.deployment_replicas, Some(5));
        assert_eq!(d.hpa_min_replicas, Some(5));
    }
}
