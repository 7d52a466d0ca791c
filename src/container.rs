//! Working-set assembly (spec §2.2, §3, §9 "Owner-graph references").
//!
//! Builds the in-memory object graph one reconciliation operates over: a
//! `StackSetContainer` wrapping the StackSet plus one `StackContainer` per
//! Stack, enriched with observed downstream facts. The graph is a tree
//! rooted at the `StackSetContainer`; each `StackContainer` holds a
//! read-through copy of the parent's ingress spec rather than a back
//! pointer, so there are no cycles to worry about when cloning (spec §9
//! "Deep-copy discipline").
//!
//! Nothing in this module performs I/O — the caller (`manager.rs`) has
//! already fetched every object from the cache.

use crate::domain::{IngressSpec, Stack, StackSet, LABEL_STACKSET, LABEL_STACK_VERSION};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Observed facts about a Stack's downstream Deployment/HorizontalPodAutoscaler,
/// as read by the external cache (spec §3, §6).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedStackResources {
    pub deployment_replicas: Option<i32>,
    pub created_replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    pub updated_replicas: Option<i32>,
    /// HPA `status.desiredReplicas`, absent when the Stack is not autoscaled
    /// or the HPA has not reported yet.
    pub hpa_desired_replicas: Option<i32>,
    /// HPA `spec.minReplicas` as currently applied, used by the Replica
    /// Planner's clamp (spec §4.3).
    pub hpa_min_replicas: Option<i32>,
}

/// Weight maps read off the shared ingress's annotations (spec §6), keyed
/// by Stack name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedIngress {
    pub actual_weights: BTreeMap<String, f64>,
    pub desired_weights: BTreeMap<String, f64>,
}

/// One Stack plus everything the reconciliation pipeline needs to know
/// about it (spec §3 "StackContainer").
#[derive(Clone, Debug, PartialEq)]
pub struct StackContainer {
    pub stack: Stack,

    pub deployment_replicas: Option<i32>,
    pub created_replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    pub updated_replicas: Option<i32>,
    pub desired_replicas: Option<i32>,
    pub hpa_min_replicas: Option<i32>,

    pub actual_traffic_weight: f64,
    pub desired_traffic_weight: f64,
    pub no_traffic_since: Option<DateTime<Utc>>,

    pub prescaling_active: bool,
    pub prescaling_replicas: i32,
    pub prescaling_desired_traffic_weight: f64,
    pub prescaling_last_traffic_increase: Option<DateTime<Utc>>,

    /// Copy of the parent StackSet's ingress spec, or `None` if the
    /// StackSet has no ingress at all (spec §3 invariant: "A Stack with
    /// `ingressSpec == nil` never has traffic").
    pub ingress_spec: Option<IngressSpec>,

    /// Set by the Lifecycle Decider (spec §4.1); never set here.
    pub pending_removal: bool,
}

impl StackContainer {
    pub fn name(&self) -> &str {
        self.stack.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.stack
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
    }

    pub fn stack_replicas(&self) -> Option<i32> {
        self.stack.spec.replicas
    }

    pub fn is_autoscaled(&self) -> bool {
        crate::domain::is_autoscaled(&self.stack.spec)
    }

    /// `HasTraffic` (spec §4.3 table).
    pub fn has_traffic(&self) -> bool {
        self.actual_traffic_weight > 0.0 || self.desired_traffic_weight > 0.0
    }

    /// `ScaledDown` (spec §4.3 table).
    pub fn scaled_down(&self, now: DateTime<Utc>, scaledown_ttl_seconds: i64) -> bool {
        if self.has_traffic() {
            return false;
        }
        match self.no_traffic_since {
            Some(since) => (now - since).num_seconds() >= scaledown_ttl_seconds,
            None => false,
        }
    }

    /// `IsReady` (spec §4.3 table).
    pub fn is_ready(&self) -> bool {
        let d = self.deployment_replicas.unwrap_or(0);
        let r = self.ready_replicas.unwrap_or(0);
        let u = self.updated_replicas.unwrap_or(0);
        d >= 1 && d == r && d == u
    }

    /// Candidate set membership for garbage collection (spec §4.1): no
    /// ingress exposure, or currently scaled down.
    pub fn is_gc_candidate(&self, now: DateTime<Utc>, scaledown_ttl_seconds: i64) -> bool {
        self.ingress_spec.is_none() || self.scaled_down(now, scaledown_ttl_seconds)
    }
}

/// A StackSet plus the full working set of its Stacks (spec §2.2).
#[derive(Clone, Debug, PartialEq)]
pub struct StackSetContainer {
    pub stackset: StackSet,
    pub stacks: Vec<StackContainer>,
}

impl StackSetContainer {
    pub fn name(&self) -> &str {
        self.stackset.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.stackset.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn find(&self, stack_name: &str) -> Option<&StackContainer> {
        self.stacks.iter().find(|s| s.name() == stack_name)
    }

    pub fn find_mut(&mut self, stack_name: &str) -> Option<&mut StackContainer> {
        self.stacks.iter_mut().find(|s| s.name() == stack_name)
    }

    /// Stacks not marked `PendingRemoval`.
    pub fn live_stacks(&self) -> impl Iterator<Item = &StackContainer> {
        self.stacks.iter().filter(|s| !s.pending_removal)
    }

    pub fn live_stacks_mut(&mut self) -> impl Iterator<Item = &mut StackContainer> {
        self.stacks.iter_mut().filter(|s| !s.pending_removal)
    }

    /// Stacks eligible to carry traffic: not pending removal and with a
    /// non-nil ingress spec (spec §4.2 "Normalization").
    pub fn traffic_eligible(&self) -> impl Iterator<Item = &StackContainer> {
        self.live_stacks()
            .filter(|s| s.ingress_spec.is_some())
    }

    pub fn traffic_eligible_mut(&mut self) -> impl Iterator<Item = &mut StackContainer> {
        self.live_stacks_mut()
            .filter(|s| s.ingress_spec.is_some())
    }
}

/// Selector labels applied to every generated deployment/service selector
/// (spec §3, §6 "Labels"). Only these two labels are ever propagated,
/// regardless of what the user attaches to a Stack.
pub fn selector_labels(stackset_name: &str, version: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_STACKSET.to_string(), stackset_name.to_string());
    labels.insert(LABEL_STACK_VERSION.to_string(), version.to_string());
    labels
}

/// Builds the working set from raw, already-fetched cache objects. Pure:
/// no cache lookups happen here, only folding of already-retrieved data
/// (spec §9 "Deep-copy discipline" — every input is cloned, never aliased).
pub fn assemble(
    stackset: StackSet,
    stacks: Vec<Stack>,
    observed: &BTreeMap<String, ObservedStackResources>,
    ingress: Option<&ObservedIngress>,
) -> StackSetContainer {
    let ingress_spec = stackset.spec.ingress.clone();

    let containers = stacks
        .into_iter()
        .map(|stack| {
            let name = stack.metadata.name.clone().unwrap_or_default();
            let res = observed.get(&name).cloned().unwrap_or_default();

            let actual_traffic_weight = ingress
                .and_then(|i| i.actual_weights.get(&name).copied())
                .unwrap_or(0.0);
            let desired_traffic_weight = ingress
                .and_then(|i| i.desired_weights.get(&name).copied())
                .unwrap_or(0.0);

            let status = stack.status.clone().unwrap_or_default();
            let prescaling = status.prescaling.clone();

            StackContainer {
                deployment_replicas: res.deployment_replicas,
                created_replicas: res.created_replicas,
                ready_replicas: res.ready_replicas,
                updated_replicas: res.updated_replicas,
                desired_replicas: res.hpa_desired_replicas,
                hpa_min_replicas: res.hpa_min_replicas,

                actual_traffic_weight,
                desired_traffic_weight,
                no_traffic_since: status.no_traffic_since,

                prescaling_active: prescaling.as_ref().map(|p| p.active).unwrap_or(false),
                prescaling_replicas: prescaling.as_ref().map(|p| p.replicas).unwrap_or(0),
                prescaling_desired_traffic_weight: prescaling
                    .as_ref()
                    .map(|p| p.desired_traffic_weight)
                    .unwrap_or(0.0),
                prescaling_last_traffic_increase: prescaling
                    .as_ref()
                    .and_then(|p| p.last_traffic_increase),

                ingress_spec: ingress_spec.clone(),
                pending_removal: false,

                stack,
            }
        })
        .collect();

    StackSetContainer {
        stackset,
        stacks: containers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StackSpec, StackStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn stack(name: &str) -> Stack {
        Stack::new(
            name,
            StackSpec {
                pod_template: Default::default(),
                replicas: Some(3),
                service_ports: None,
                autoscaler: None,
                horizontal_pod_autoscaler: None,
            },
        )
    }

    #[test]
    fn selector_labels_only_carry_the_two_fields() {
        let labels = selector_labels("foo", "v1");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(LABEL_STACKSET).unwrap(), "foo");
        assert_eq!(labels.get(LABEL_STACK_VERSION).unwrap(), "v1");
    }

    #[test]
    fn assemble_copies_parent_ingress_into_every_stack() {
        let mut ss = StackSet::new(
            "foo",
            crate::domain::StackSetSpec {
                stack_template: Default::default(),
                stack_lifecycle: None,
                ingress: Some(IngressSpec {
                    path: Some("/".into()),
                    backend_port: crate::domain::stackset::IngressBackendPort::Number(80),
                    hosts: vec!["foo.example.com".into()],
                    annotations: None,
                }),
            },
        );
        ss.metadata.namespace = Some("default".into());

        let container = assemble(ss, vec![stack("foo-v1")], &Default::default(), None);
        assert_eq!(container.stacks.len(), 1);
        assert!(container.stacks[0].ingress_spec.is_some());
    }

    #[test]
    fn has_traffic_true_if_either_weight_positive() {
        let mut sc = base_container();
        assert!(!sc.has_traffic());
        sc.desired_traffic_weight = 50.0;
        assert!(sc.has_traffic());
        sc.desired_traffic_weight = 0.0;
        sc.actual_traffic_weight = 10.0;
        assert!(sc.has_traffic());
    }

    #[test]
    fn scaled_down_requires_ttl_elapsed() {
        let mut sc = base_container();
        let now = "2024-01-01T00:10:00Z".parse::<DateTime<Utc>>().unwrap();
        sc.no_traffic_since = Some("2024-01-01T00:09:00Z".parse().unwrap());
        assert!(!sc.scaled_down(now, 300));
        sc.no_traffic_since = Some("2024-01-01T00:00:00Z".parse().unwrap());
        assert!(sc.scaled_down(now, 300));
    }

    #[test]
    fn is_ready_requires_all_three_counts_equal_and_nonzero() {
        let mut sc = base_container();
        sc.deployment_replicas = Some(0);
        assert!(!sc.is_ready());
        sc.deployment_replicas = Some(3);
        sc.ready_replicas = Some(3);
        sc.updated_replicas = Some(2);
        assert!(!sc.is_ready());
        sc.updated_replicas = Some(3);
        assert!(sc.is_ready());
    }

    fn base_container() -> StackContainer {
        let mut s = stack("foo-v1");
        s.metadata = ObjectMeta {
            name: Some("foo-v1".into()),
            creation_timestamp: Some(Time("2024-01-01T00:00:00Z".parse().unwrap())),
            ..Default::default()
        };
        let _ = StackStatus::default();
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
}
