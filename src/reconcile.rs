//! Reconciliation pipeline (spec §7): wires the Lifecycle Decider, Traffic
//! Reconciler, Replica Planner, Resource Generator and Status Aggregator
//! together over an already-assembled `StackSetContainer`.
//!
//! Pure and I/O-free — `manager.rs` assembles the container from the cache
//! beforehand and persists `ReconcileOutcome` afterward. Non-fatal errors
//! (spec §7: no-paths, no-stacks-for-traffic, port-mismatch,
//! custom-metric-translation) are collected rather than aborting the whole
//! tick; any other error short-circuits the pipeline.

use crate::container::StackSetContainer;
use crate::domain::{Stack, StackSetStatus, StackStatus};
use crate::errors::*;
use crate::{lifecycle, replicas, resources, status, traffic};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

/// Everything a single reconciliation tick produces, ready for the caller
/// to persist via server-side apply (spec §7).
#[derive(Default)]
pub struct ReconcileOutcome {
    /// Set when the Lifecycle Decider materializes a new Stack this tick
    /// (spec §4.1). The caller persists it and bumps
    /// `status.observedStackVersion` only after that succeeds.
    pub new_stack: Option<Stack>,

    pub deployments: Vec<Deployment>,
    pub services: Vec<Service>,
    pub autoscalers: Vec<HorizontalPodAutoscaler>,
    pub per_stack_ingresses: Vec<Ingress>,
    pub shared_ingress: Option<Ingress>,

    pub stackset_status: StackSetStatus,
    pub stack_statuses: Vec<(String, StackStatus)>,

    /// Stack names marked `pendingRemoval` this tick (spec §4.1); the
    /// caller deletes these once persisted status shows them retired.
    pub pending_removal: Vec<String>,

    /// Non-fatal errors collected along the way (spec §7); logged by the
    /// caller, never aborting the tick.
    pub non_fatal_errors: Vec<Error>,
}

/// Runs the full pipeline over one StackSet's working set (spec §7).
///
/// Returns `Err` only for a genuinely fatal failure (anything that isn't
/// one of the four kinds `Error::is_non_fatal` recognizes) — traffic
/// reconciliation's `NoStacksForTraffic` and the per-Stack errors from
/// resource generation are captured in `non_fatal_errors` instead.
pub fn run(mut container: StackSetContainer, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();

    outcome.new_stack = lifecycle::decide_new_stack(&container);

    lifecycle::mark_pending_removal(&mut container, now);
    outcome.pending_removal = container
        .stacks
        .iter()
        .filter(|s| s.pending_removal)
        .map(|s| s.name().to_string())
        .collect();

    if let Err(e) = traffic::reconcile_traffic(&mut container, now) {
        if e.is_non_fatal() {
            outcome.non_fatal_errors.push(e);
        } else {
            return Err(e);
        }
    }

    let decisions = replicas::plan_all(&container, now);

    for (name, decision) in &decisions {
        let Some(sc) = container.find(name) else { continue };

        outcome.deployments.push(resources::deployment::generate(sc, *decision));

        let backend_port = sc.ingress_spec.as_ref().map(|i| &i.backend_port);
        match resources::service::generate(sc, backend_port) {
            Ok(svc) => outcome.services.push(svc),
            Err(e) if e.is_non_fatal() => outcome.non_fatal_errors.push(e),
            Err(e) => return Err(e),
        }

        match resources::autoscaler::generate(sc, decision.hpa_min_replicas) {
            Ok(Some(hpa)) => outcome.autoscalers.push(hpa),
            Ok(None) => {}
            Err(e) if e.is_non_fatal() => outcome.non_fatal_errors.push(e),
            Err(e) => return Err(e),
        }

        if let Some(ingress) = resources::ingress::generate_per_stack(sc) {
            outcome.per_stack_ingresses.push(ingress);
        }
    }

    if container.stackset.spec.ingress.is_some() {
        match resources::ingress::generate_shared(&container) {
            Ok(ingress) => outcome.shared_ingress = Some(ingress),
            Err(e) if e.is_non_fatal() => outcome.non_fatal_errors.push(e),
            Err(e) => return Err(e),
        }
    }

    outcome.stackset_status = status::stackset_status(&container);
    outcome.stack_statuses = container
        .live_stacks()
        .map(|sc| (sc.name().to_string(), status::stack_status(sc)))
        .collect();

    Ok(outcome)
}
