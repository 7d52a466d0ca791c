//! Free-function predicates that only need a `StackSpec` (spec §4.3 table).
//!
//! The other three predicates in the table (`HasTraffic`, `ScaledDown`,
//! `IsReady`) need observed downstream facts that only exist on a
//! `StackContainer`, so they live as methods on that type in `container.rs`
//! instead of here — keeping them here would force a dependency cycle
//! between `domain` and `container`.

use super::stack::StackSpec;

/// `IsAutoscaled`: Stack spec has either `autoscaler` or
/// `horizontalPodAutoscaler` populated.
pub fn is_autoscaled(spec: &StackSpec) -> bool {
    spec.is_autoscaled()
}
