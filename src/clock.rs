//! Injected time source.
//!
//! The reconciliation core is a pure function of observed state (see
//! `DESIGN.md` / spec §9 "Global state"). Anything that needs "now" takes a
//! `&dyn Clock` instead of calling `chrono::Utc::now()` directly, so tests
//! can pin time and the pipeline stays deterministic.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed-time clock for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_always_returns_same_instant() {
        let t = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let c = FixedClock(t);
        assert_eq!(c.now(), t);
        assert_eq!(c.now(), t);
    }
}
