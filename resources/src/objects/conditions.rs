use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum::Display;

/// The four status conditions a scalable object's reconciler maintains.
/// Stable across releases; reconcilers and tests match on these names, not
/// on the human-readable message.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConditionType {
    Ready,
    Active,
    Fallback,
    Paused,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: NaiveDateTime,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Condition {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Local::now().naive_local(),
        }
    }
}

/// A scalable object's `status.conditions`. `set` only bumps
/// `last_transition_time` when the status actually flips, so a reconciler
/// that re-derives the same condition every tick doesn't churn the object.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Conditions(pub Vec<Condition>);

impl Conditions {
    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: ConditionType) -> bool {
        matches!(self.get(type_), Some(c) if c.status == ConditionStatus::True)
    }

    pub fn set(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let reason = reason.into();
        let message = message.into();
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Local::now().naive_local();
            }
            existing.reason = reason;
            existing.message = message;
        } else {
            self.0.push(Condition::new(type_, status, reason, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_status_does_not_bump_transition_time() {
        let mut conditions = Conditions::default();
        conditions.set(ConditionType::Ready, ConditionStatus::True, "Built", "ok");
        let first = conditions.get(ConditionType::Ready).unwrap().last_transition_time;

        conditions.set(ConditionType::Ready, ConditionStatus::True, "Built", "still ok");
        let second = conditions.get(ConditionType::Ready).unwrap().last_transition_time;

        assert_eq!(first, second);
        assert_eq!(
            conditions.get(ConditionType::Ready).unwrap().message,
            "still ok"
        );
    }

    #[test]
    fn changed_status_bumps_transition_time() {
        let mut conditions = Conditions::default();
        conditions.set(ConditionType::Paused, ConditionStatus::False, "Unpaused", "");
        conditions.set(ConditionType::Paused, ConditionStatus::True, "Paused", "");
        assert!(conditions.is_true(ConditionType::Paused));
    }
}
