//! Traffic Reconciler (spec §4.2): normalizes desired weights, triggers and
//! releases prescaling, and advances actual weight toward desired.

use crate::container::StackSetContainer;
use crate::errors::*;
use chrono::{DateTime, Utc};

/// Runs the full traffic-reconciliation step over every Stack in the
/// working set. Mutates `desired_traffic_weight`, `actual_traffic_weight`
/// and the `prescaling_*` fields of each eligible `StackContainer` in
/// place.
///
/// Returns `Err(ErrorKind::NoStacksForTraffic)` when desired weights sum
/// to zero and no fallback Stack exists (spec §4.2); per spec §7 this is
/// non-fatal — the caller should hold traffic routing and retry next tick
/// rather than aborting the whole reconciliation.
pub fn reconcile_traffic(container: &mut StackSetContainer, now: DateTime<Utc>) -> Result<()> {
    let normalized = normalize(container)?;
    apply_prescaling(container, &normalized, now);
    advance_actual_weights(container, &normalized);
    update_no_traffic_since(container, now);
    Ok(())
}

/// Normalization (spec §4.2): renormalize desired weights across eligible
/// Stacks (not pending, with an ingress) so they sum to 100. Falls back to
/// the most recently created eligible Stack when the input sum is zero.
/// Returns the normalized desired weight per Stack name, keeping the
/// container's own fields untouched until the prescaling pass has had a
/// chance to compare old vs. new.
fn normalize(container: &StackSetContainer) -> Result<Vec<(String, f64)>> {
    // No shared ingress configured at all: nothing to route, nothing to
    // fail (spec §8 scenario 1 — fresh StackSet, "no ingress (no actual
    // traffic yet)").
    if container.stackset.spec.ingress.is_none() {
        return Ok(vec![]);
    }

    let eligible: Vec<_> = container.traffic_eligible().collect();
    if eligible.is_empty() {
        bail!(ErrorKind::NoStacksForTraffic);
    }

    let raw_sum: f64 = eligible.iter().map(|s| s.desired_traffic_weight).sum();

    if raw_sum > 0.0 {
        return Ok(eligible
            .iter()
            .map(|s| (s.name().to_string(), s.desired_traffic_weight * 100.0 / raw_sum))
            .collect());
    }

    let fallback = eligible
        .iter()
        .max_by_key(|s| s.creation_timestamp())
        .expect("eligible is non-empty");
    let fallback_name = fallback.name().to_string();

    Ok(eligible
        .iter()
        .map(|s| {
            let w = if s.name() == fallback_name { 100.0 } else { 0.0 };
            (s.name().to_string(), w)
        })
        .collect())
}

/// Sum of ready replicas across Stacks currently serving traffic — the
/// "shared load" a newly-prescaling Stack must absorb (spec §4.2
/// "Action").
fn shared_load(container: &StackSetContainer) -> i32 {
    container
        .live_stacks()
        .filter(|s| s.actual_traffic_weight > 0.0)
        .map(|s| s.ready_replicas.unwrap_or(0))
        .sum()
}

fn apply_prescaling(container: &mut StackSetContainer, normalized: &[(String, f64)], now: DateTime<Utc>) {
    let load = shared_load(container);
    let ttl = container.stackset.spec.lifecycle().scaledown_ttl_seconds();

    for (name, new_desired) in normalized {
        let old_desired = container.find(name).map(|s| s.desired_traffic_weight).unwrap_or(0.0);
        let sc = match container.find_mut(name) {
            Some(sc) => sc,
            None => continue,
        };

        // Trigger: desired rises from <=0 to a positive value while not
        // already prescaling (spec §4.2 "Trigger"). The parenthetical
        // "or from below the minimum it currently runs" is covered by the
        // `!prescaling_active` guard: a Stack already above the
        // zero-traffic floor does not retrigger.
        if !sc.prescaling_active && old_desired <= 0.0 && *new_desired > 0.0 {
            sc.prescaling_active = true;
            sc.prescaling_replicas = load.max(1);
            sc.prescaling_desired_traffic_weight = *new_desired;
            sc.prescaling_last_traffic_increase = Some(now);
            continue;
        }

        if sc.prescaling_active {
            if *new_desired <= 0.0 {
                // Desired dropped back to zero: deactivate outright.
                sc.prescaling_active = false;
                sc.prescaling_replicas = 0;
                sc.prescaling_desired_traffic_weight = 0.0;
                sc.prescaling_last_traffic_increase = None;
                continue;
            }

            let ready = sc.ready_replicas.unwrap_or(0);
            if ready >= sc.prescaling_replicas {
                let stable = (sc.actual_traffic_weight - new_desired).abs() < f64::EPSILON;
                let held_long_enough = sc
                    .prescaling_last_traffic_increase
                    .map(|t| (now - t).num_seconds() >= ttl)
                    .unwrap_or(false);
                if stable && held_long_enough {
                    sc.prescaling_active = false;
                    sc.prescaling_replicas = 0;
                    sc.prescaling_desired_traffic_weight = 0.0;
                    sc.prescaling_last_traffic_increase = None;
                }
            }
        }
    }
}

/// Actual-weight advancement (spec §4.2). If any eligible Stack is
/// currently held back by prescaling (active but not yet ready), no
/// actual weight moves this tick — moving some while holding others back
/// would both overshoot 100 and starve the Stack still warming up.
/// Otherwise every eligible Stack's actual weight jumps straight to its
/// normalized desired weight.
fn advance_actual_weights(container: &mut StackSetContainer, normalized: &[(String, f64)]) {
    let any_held = container.traffic_eligible().any(|s| {
        s.prescaling_active && s.ready_replicas.unwrap_or(0) < s.prescaling_replicas
    });

    for (name, new_desired) in normalized {
        if let Some(sc) = container.find_mut(name) {
            sc.desired_traffic_weight = *new_desired;
            if !any_held {
                sc.actual_traffic_weight = *new_desired;
            }
        }
    }

    // Stacks that fell out of eligibility (pending removal, or lost their
    // ingress) carry no weight.
    for sc in container.stacks.iter_mut() {
        if sc.pending_removal || sc.ingress_spec.is_none() {
            sc.desired_traffic_weight = 0.0;
            sc.actual_traffic_weight = 0.0;
        }
    }
}

/// Stamps `noTrafficSince` the tick a Stack's actual weight settles at
/// zero, and clears it the moment traffic returns (spec §8 scenario 3,
/// §4.3 `ScaledDown`'s dependency on this field).
fn update_no_traffic_since(container: &mut StackSetContainer, now: DateTime<Utc>) {
    for sc in container.stacks.iter_mut() {
        if sc.has_traffic() {
            sc.no_traffic_since = None;
        } else if sc.no_traffic_since.is_none() {
            sc.no_traffic_since = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{assemble, ObservedIngress, ObservedStackResources};
    use crate::domain::{IngressSpec, Stack, StackSet, StackSetSpec, StackSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn make_stack(name: &str, ts: &str) -> Stack {
        let mut s = Stack::new(
            name,
            StackSpec {
                pod_template: Default::default(),
                replicas: Some(5),
                service_ports: None,
                autoscaler: None,
                horizontal_pod_autoscaler: None,
            },
        );
        s.metadata = ObjectMeta {
            name: Some(name.into()),
            creation_timestamp: Some(Time(ts.parse().unwrap())),
            ..Default::default()
        };
        s
    }

    fn stackset_with_ingress() -> StackSet {
        let mut ss = StackSet::new(
            "foo",
            StackSetSpec {
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
        ss
    }

    #[test]
    fn version_bump_triggers_prescaling_and_holds_actual() {
        let ss = stackset_with_ingress();
        let v1 = make_stack("foo-v1", "2024-01-01T00:00:00Z");
        let v2 = make_stack("foo-v2", "2024-01-02T00:00:00Z");

        let mut observed = BTreeMap::new();
        observed.insert(
            "foo-v1".to_string(),
            ObservedStackResources {
                ready_replicas: Some(5),
                ..Default::default()
            },
        );
        observed.insert(
            "foo-v2".to_string(),
            ObservedStackResources {
                ready_replicas: Some(0),
                ..Default::default()
            },
        );

        let ingress = ObservedIngress {
            actual_weights: [("foo-v1".to_string(), 100.0)].into_iter().collect(),
            desired_weights: [("foo-v2".to_string(), 100.0)].into_iter().collect(),
        };

        let mut container = assemble(ss, vec![v1, v2], &observed, Some(&ingress));
        let now = "2024-01-03T00:00:00Z".parse().unwrap();
        reconcile_traffic(&mut container, now).unwrap();

        let v2 = container.find("foo-v2").unwrap();
        assert!(v2.prescaling_active);
        assert_eq!(v2.prescaling_replicas, 5);
        assert_eq!(v2.actual_traffic_weight, 0.0, "held until ready");
        assert_eq!(container.find("foo-v1").unwrap().actual_traffic_weight, 100.0);
    }

    #[test]
    fn release_once_ready_advances_actual_fully() {
        let ss = stackset_with_ingress();
        let v1 = make_stack("foo-v1", "2024-01-01T00:00:00Z");
        let v2 = make_stack("foo-v2", "2024-01-02T00:00:00Z");

        let mut observed = BTreeMap::new();
        observed.insert(
            "foo-v1".to_string(),
            ObservedStackResources {
                ready_replicas: Some(5),
                ..Default::default()
            },
        );
        observed.insert(
            "foo-v2".to_string(),
            ObservedStackResources {
                ready_replicas: Some(5),
                ..Default::default()
            },
        );

        let ingress = ObservedIngress {
            actual_weights: [("foo-v1".to_string(), 100.0)].into_iter().collect(),
            desired_weights: [("foo-v2".to_string(), 100.0)].into_iter().collect(),
        };

        let mut container = assemble(ss, vec![v1, v2], &observed, Some(&ingress));
        let now = "2024-01-03T00:00:00Z".parse().unwrap();
        reconcile_traffic(&mut container, now).unwrap();

        assert_eq!(container.find("foo-v1").unwrap().actual_traffic_weight, 0.0);
        assert_eq!(container.find("foo-v2").unwrap().actual_traffic_weight, 100.0);
        assert_eq!(container.find("foo-v1").unwrap().no_traffic_since, Some(now));
    }

    #[test]
    fn zero_sum_falls_back_to_most_recent_stack() {
        let ss = stackset_with_ingress();
        let v1 = make_stack("foo-v1", "2024-01-01T00:00:00Z");
        let v2 = make_stack("foo-v2", "2024-01-02T00:00:00Z");
        let mut container = assemble(ss, vec![v1, v2], &Default::default(), None);
        reconcile_traffic(&mut container, "2024-01-03T00:00:00Z".parse().unwrap()).unwrap();

        assert_eq!(container.find("foo-v1").unwrap().desired_traffic_weight, 0.0);
        assert_eq!(container.find("foo-v2").unwrap().desired_traffic_weight, 100.0);
    }

    #[test]
    fn no_ingress_configured_is_a_noop_not_an_error() {
        let ss = StackSet::new(
            "foo",
            StackSetSpec {
                stack_template: Default::default(),
                stack_lifecycle: None,
                ingress: None,
            },
        );
        let v1 = make_stack("foo-v1", "2024-01-01T00:00:00Z");
        let mut container = assemble(ss, vec![v1], &Default::default(), None);
        assert!(reconcile_traffic(&mut container, "2024-01-03T00:00:00Z".parse().unwrap()).is_ok());
    }

    #[test]
    fn ingress_configured_but_no_stacks_errors() {
        let ss = stackset_with_ingress();
        let mut container = assemble(ss, vec![], &Default::default(), None);
        let err = reconcile_traffic(&mut container, "2024-01-03T00:00:00Z".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::NoStacksForTraffic));
    }
}
