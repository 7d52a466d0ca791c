//! Controller wiring (spec §2.1, §7): owns the watch/reconcile loop that
//! feeds `container::assemble` and `reconcile::run` with live cluster state
//! and writes their output back with server-side apply.

use crate::clock::{Clock, SystemClock};
use crate::container::{assemble, ObservedIngress, ObservedStackResources};
use crate::domain::{StackSet, StackSetStatus, LABEL_STACKSET};
use crate::errors::*;
use crate::reconcile::{self, ReconcileOutcome};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "stackset-controller";

/// Shared context handed to every reconciler invocation.
pub struct Data {
    pub client: Client,
    pub clock: Arc<dyn Clock>,
}

pub fn error_policy(_stackset: Arc<StackSet>, error: &Error, _ctx: Arc<Data>) -> Action {
    warn!("reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(60))
}

/// Runs the controller loop forever, driving one `reconcile` call per
/// StackSet event (spec §2.1 "per-StackSet reconciliation").
pub async fn run(client: Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.get("stacksets.zalando.org")
        .await
        .expect("install stackset crd first");
    crds.get("stacks.zalando.org")
        .await
        .expect("install stack crd first");

    let stacksets: Api<StackSet> = Api::all(client.clone());
    let ctx = Arc::new(Data {
        client,
        clock: Arc::new(SystemClock),
    });

    Controller::new(stacksets, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_one, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(e) => error!("reconcile error: {}", e),
            }
        })
        .await;

    Ok(())
}

/// Reconciles a single StackSet: fetches its Stacks and their downstream
/// resources from the cluster, runs the pure pipeline, and applies the
/// result (spec §7).
async fn reconcile_one(stackset: Arc<StackSet>, ctx: Arc<Data>) -> Result<Action> {
    let client = ctx.client.clone();
    let ns = stackset.namespace().unwrap_or_else(|| "default".into());
    let name = stackset.name_any();
    debug!("Reconcile StackSet {}/{}: {:?}", ns, name, stackset);

    let stacksets_api: Api<StackSet> = Api::namespaced(client.clone(), &ns);
    let stacks_api: Api<crate::domain::Stack> = Api::namespaced(client.clone(), &ns);
    let deployments_api: Api<Deployment> = Api::namespaced(client.clone(), &ns);
    let services_api: Api<Service> = Api::namespaced(client.clone(), &ns);
    let hpas_api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), &ns);
    let ingress_api: Api<Ingress> = Api::namespaced(client.clone(), &ns);

    let lp = ListParams::default().labels(&format!("{}={}", LABEL_STACKSET, name));
    let stacks = stacks_api.list(&lp).await?.items;

    let mut observed = std::collections::BTreeMap::new();
    for stack in &stacks {
        let stack_name = stack.name_any();
        let deployment = deployments_api.get_opt(&stack_name).await?;
        let deployment_replicas = deployment.as_ref().and_then(|d| d.spec.as_ref()).and_then(|s| s.replicas);
        let (ready_replicas, updated_replicas) = deployment
            .as_ref()
            .and_then(|d| d.status.clone())
            .map(|s| (s.ready_replicas, s.updated_replicas))
            .unwrap_or((None, None));

        let hpa = hpas_api.get_opt(&stack_name).await?;
        let hpa_desired_replicas = hpa.as_ref().and_then(|h| h.status.as_ref()).map(|s| s.desired_replicas);
        let hpa_min_replicas = hpa.as_ref().and_then(|h| h.spec.as_ref()).and_then(|s| s.min_replicas);

        observed.insert(
            stack_name,
            ObservedStackResources {
                deployment_replicas,
                created_replicas: deployment_replicas,
                ready_replicas,
                updated_replicas,
                hpa_desired_replicas,
                hpa_min_replicas,
            },
        );
    }

    let shared_ingress = ingress_api.get_opt(&name).await?;
    let observed_ingress = shared_ingress.as_ref().map(read_ingress_weights);

    let container = assemble(
        (*stackset).clone(),
        stacks,
        &observed,
        observed_ingress.as_ref(),
    );

    let now = ctx.clock.now();
    let current_version = stackset.spec.current_version();
    let outcome = reconcile::run(container, now)?;

    apply(
        &ns,
        &name,
        &current_version,
        outcome,
        &deployments_api,
        &services_api,
        &hpas_api,
        &ingress_api,
        &stacks_api,
        &stacksets_api,
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

/// Recovers `ObservedIngress` from the shared ingress's weight annotations
/// (spec §6 — these annotations are the only durable record of the
/// previous tick's traffic state).
fn read_ingress_weights(ingress: &Ingress) -> ObservedIngress {
    let annotations = ingress.metadata.annotations.clone().unwrap_or_default();
    let parse = |key: &str| -> std::collections::BTreeMap<String, f64> {
        annotations
            .get(key)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    };
    ObservedIngress {
        actual_weights: parse(crate::domain::ANNOTATION_BACKEND_WEIGHTS),
        desired_weights: parse(crate::domain::ANNOTATION_STACK_TRAFFIC_WEIGHTS),
    }
}

/// Persists a `ReconcileOutcome` via server-side apply, one patch per
/// generated object (spec §7 "The caller persists...").
async fn apply(
    ns: &str,
    stackset_name: &str,
    current_version: &str,
    outcome: ReconcileOutcome,
    deployments_api: &Api<Deployment>,
    services_api: &Api<Service>,
    hpas_api: &Api<HorizontalPodAutoscaler>,
    ingress_api: &Api<Ingress>,
    stacks_api: &Api<crate::domain::Stack>,
    stacksets_api: &Api<StackSet>,
) -> Result<()> {
    let pp = PatchParams::apply(FIELD_MANAGER);

    // Spec §4.1: the new Stack must be persisted *before* observedStackVersion
    // is bumped, so a crash between the two leaves the version "unconsumed"
    // and the next tick simply retries stack creation rather than skipping it.
    let new_stack_version = if let Some(stack) = &outcome.new_stack {
        let name = stack.name_any();
        stacks_api.patch(&name, &pp, &Patch::Apply(stack)).await?;
        Some(current_version.to_string())
    } else {
        None
    };

    let mut status = outcome.stackset_status.clone();
    if let Some(version) = new_stack_version {
        status.observed_stack_version = Some(version);
    }
    patch_stackset_status(stacksets_api, stackset_name, &status).await?;

    for d in &outcome.deployments {
        let name = d.name_any();
        deployments_api.patch(&name, &pp, &Patch::Apply(d)).await?;
    }
    for s in &outcome.services {
        let name = s.name_any();
        services_api.patch(&name, &pp, &Patch::Apply(s)).await?;
    }
    for h in &outcome.autoscalers {
        let name = h.name_any();
        hpas_api.patch(&name, &pp, &Patch::Apply(h)).await?;
    }
    for i in &outcome.per_stack_ingresses {
        let name = i.name_any();
        ingress_api.patch(&name, &pp, &Patch::Apply(i)).await?;
    }
    if let Some(i) = &outcome.shared_ingress {
        let name = i.name_any();
        ingress_api.patch(&name, &pp, &Patch::Apply(i)).await?;
    }

    for (stack_name, stack_status) in &outcome.stack_statuses {
        patch_stack_status(stacks_api, stack_name, stack_status).await?;
    }

    for name in &outcome.pending_removal {
        if let Err(e) = stacks_api.delete(name, &Default::default()).await {
            warn!("failed to delete pending-removal stack {} in {}: {}", name, ns, e);
        }
    }

    for e in &outcome.non_fatal_errors {
        warn!("non-fatal reconciliation error in {}: {}", ns, e);
    }

    Ok(())
}

/// Patches the StackSet's `status` subresource (spec §4.5) — including the
/// `observedStackVersion` bump, when a new Stack was just persisted this
/// tick (spec §4.1).
async fn patch_stackset_status(
    stacksets_api: &Api<StackSet>,
    name: &str,
    status: &StackSetStatus,
) -> Result<()> {
    let patch = json!({ "status": status });
    stacksets_api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Patches a single Stack's `status` subresource (spec §4.5 "Per-Stack
/// status").
async fn patch_stack_status(
    stacks_api: &Api<crate::domain::Stack>,
    name: &str,
    status: &crate::domain::StackStatus,
) -> Result<()> {
    let patch = json!({ "status": status });
    stacks_api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}
