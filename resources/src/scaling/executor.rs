use chrono::{Duration, NaiveDateTime};

use crate::{
    objects::object_reference::ObjectReference,
    scaling::target_resolver::TargetResolver,
};

/// What one tick of the executor decided to do, mainly so callers and
/// tests can assert on intent without re-deriving it from replica counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    WakeFromZero { to: u32 },
    ScaleToZero,
    ScaleToIdle { to: u32 },
    NoOp,
}

/// Moves a target's replica count between zero and its minimum on
/// activity transitions; everything in the active range is left to the
/// Kubernetes-native HPA this core feeds. See the design notes on why
/// stabilization-window/velocity math does not belong here.
pub struct ScaleExecutor<'a> {
    resolver: &'a TargetResolver,
}

impl<'a> ScaleExecutor<'a> {
    pub fn new(resolver: &'a TargetResolver) -> Self {
        ScaleExecutor { resolver }
    }

    pub fn decide(
        current_replicas: u32,
        is_active: bool,
        last_active_time: Option<NaiveDateTime>,
        now: NaiveDateTime,
        min_replica_count: u32,
        idle_replica_count: Option<u32>,
        cooldown_period: Duration,
    ) -> ScaleDecision {
        if is_active {
            if current_replicas == 0 {
                return ScaleDecision::WakeFromZero { to: min_replica_count.max(1) };
            }
            return ScaleDecision::NoOp;
        }

        let elapsed_since_active = match last_active_time {
            Some(t) => now - t,
            None => Duration::max_value(),
        };
        if elapsed_since_active < cooldown_period {
            return ScaleDecision::NoOp;
        }

        match idle_replica_count {
            Some(idle) if idle != 0 && current_replicas != idle => ScaleDecision::ScaleToIdle { to: idle },
            Some(idle) if idle == 0 && current_replicas != 0 => ScaleDecision::ScaleToZero,
            None if current_replicas != 0 => ScaleDecision::ScaleToZero,
            _ => ScaleDecision::NoOp,
        }
    }

    pub async fn apply(&self, target: &ObjectReference, decision: ScaleDecision) -> anyhow::Result<()> {
        match decision {
            ScaleDecision::WakeFromZero { to } => self.resolver.set_replicas(target, to).await?,
            ScaleDecision::ScaleToZero => self.resolver.set_replicas(target, 0).await?,
            ScaleDecision::ScaleToIdle { to } => self.resolver.set_replicas(target, to).await?,
            ScaleDecision::NoOp => {},
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn wakes_from_zero_when_active() {
        let decision = ScaleExecutor::decide(0, true, None, at(0), 1, None, Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::WakeFromZero { to: 1 });
    }

    #[test]
    fn no_op_while_active_and_already_scaled() {
        let decision = ScaleExecutor::decide(3, true, None, at(0), 1, None, Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn stays_up_until_cooldown_elapses() {
        let decision = ScaleExecutor::decide(3, false, Some(at(0)), at(100), 0, None, Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::NoOp);
    }

    #[test]
    fn scales_to_zero_after_cooldown() {
        let decision = ScaleExecutor::decide(3, false, Some(at(0)), at(301), 0, None, Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::ScaleToZero);
    }

    #[test]
    fn scales_to_idle_count_when_configured() {
        let decision = ScaleExecutor::decide(3, false, Some(at(0)), at(400), 0, Some(2), Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::ScaleToIdle { to: 2 });
    }

    #[test]
    fn never_scaled_up_yet_treated_as_long_cooled_down() {
        let decision = ScaleExecutor::decide(2, false, None, at(0), 0, None, Duration::seconds(300));
        assert_eq!(decision, ScaleDecision::ScaleToZero);
    }
}
