//! Typed domain records for the StackSet/Stack object pair.
//!
//! One file per CRD — each module owns its `#[derive(CustomResource)]`
//! struct plus the small amount of logic that only makes sense hung off
//! that struct.

pub mod predicates;
pub mod stack;
pub mod stackset;

pub use predicates::*;
pub use stack::{PrescalingStatus, Stack, StackSpec, StackStatus};
pub use stackset::{
    IngressSpec, StackLifecycle, StackSet, StackSetSpec, StackSetStatus, StackTemplate,
};

/// The two labels that are ever allowed into a generated deployment or
/// service selector (spec §3, §6 "Labels"). Centralized here so every
/// resource generator in `resources/` references the same constants
/// instead of re-deriving them.
pub const LABEL_STACKSET: &str = "stackset";
pub const LABEL_STACK_VERSION: &str = "stack-version";

/// Annotation stamped on every per-Stack generated resource, used by the
/// external reconciler as a cheap "did spec change?" check (spec §4.4, §6).
pub const ANNOTATION_STACK_GENERATION: &str = "stackset-controller.zalando.org/stack-generation";

/// Annotations carried on the shared ingress (spec §6).
pub const ANNOTATION_BACKEND_WEIGHTS: &str = "zalando.org/backend-weights";
pub const ANNOTATION_STACK_TRAFFIC_WEIGHTS: &str = "zalando.org/stack-traffic-weights";
