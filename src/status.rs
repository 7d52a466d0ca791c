//! Status Aggregator (spec §4.5): rolls the post-reconciliation
//! `StackSetContainer` up into the status subresources the external writer
//! persists. Pure — no I/O, no clock reads (every timestamp already lives
//! on the container from the Traffic Reconciler).

use crate::container::{StackContainer, StackSetContainer};
use crate::domain::stack::PrescalingStatus as DomainPrescalingStatus;
use crate::domain::{StackSetStatus, StackStatus};

/// Per-Stack status (spec §4.5): traffic weights, the four replica counts,
/// `noTrafficSince`, and the prescaling sub-object when active.
pub fn stack_status(sc: &StackContainer) -> StackStatus {
    StackStatus {
        actual_traffic_weight: sc.actual_traffic_weight,
        desired_traffic_weight: sc.desired_traffic_weight,
        replicas: sc.deployment_replicas,
        ready_replicas: sc.ready_replicas,
        updated_replicas: sc.updated_replicas,
        desired_replicas: sc.desired_replicas,
        no_traffic_since: sc.no_traffic_since,
        prescaling: sc.prescaling_active.then(|| DomainPrescalingStatus {
            active: true,
            replicas: sc.prescaling_replicas,
            desired_traffic_weight: sc.prescaling_desired_traffic_weight,
            last_traffic_increase: sc.prescaling_last_traffic_increase,
        }),
    }
}

/// StackSet-level status (spec §4.5): counts over the non-pending Stacks
/// only — a Stack marked `PendingRemoval` this tick is already on its way
/// out and shouldn't inflate `stacks`/`readyStacks`.
pub fn stackset_status(container: &StackSetContainer) -> StackSetStatus {
    let live: Vec<&StackContainer> = container.live_stacks().collect();

    StackSetStatus {
        observed_stack_version: container.stackset.status.as_ref().and_then(|s| s.observed_stack_version.clone()),
        stacks: live.len() as i32,
        stacks_with_traffic: live.iter().filter(|s| s.has_traffic()).count() as i32,
        ready_stacks: live.iter().filter(|s| s.is_ready()).count() as i32,
    }
}
