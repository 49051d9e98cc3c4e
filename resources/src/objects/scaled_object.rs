use serde::{Deserialize, Serialize};
use strum::Display;

use crate::objects::{
    conditions::Conditions,
    object_reference::ObjectReference,
    trigger::{MetricType, TriggerSpec},
    Metadata,
};

/// How a fallback value is synthesized once a trigger's scaler has
/// exceeded `failure_threshold` consecutive errors. Only meaningful for
/// `AverageValue` triggers; `Value`/`Utilization` triggers reject fallback
/// at validation time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum FallbackBehavior {
    Static,
    CurrentReplicas,
    CurrentReplicasIfHigher,
    CurrentReplicasIfLower,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Fallback {
    pub failure_threshold: u32,
    pub replicas: u32,
    pub behavior: FallbackBehavior,
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback {
            failure_threshold: 3,
            replicas: 1,
            behavior: FallbackBehavior::CurrentReplicas,
        }
    }
}

fn default_min_replicas() -> u32 {
    0
}

fn default_max_replicas() -> u32 {
    100
}

fn default_polling_interval() -> u64 {
    30
}

fn default_cooldown_period() -> u64 {
    300
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledObjectSpec {
    pub scale_target_ref: ObjectReference,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: u64,
    pub idle_replica_count: Option<u32>,
    #[serde(default = "default_min_replicas")]
    pub min_replica_count: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replica_count: u32,
    pub fallback: Option<Fallback>,
    pub triggers: Vec<TriggerSpec>,
}

impl Default for ScaledObjectSpec {
    fn default() -> Self {
        ScaledObjectSpec {
            scale_target_ref: ObjectReference::default(),
            polling_interval: default_polling_interval(),
            cooldown_period: default_cooldown_period(),
            idle_replica_count: None,
            min_replica_count: default_min_replicas(),
            max_replica_count: default_max_replicas(),
            fallback: None,
            triggers: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledObjectStatus {
    pub conditions: Conditions,
    pub original_replica_count: Option<u32>,
    pub last_active_time: Option<chrono::NaiveDateTime>,
    pub observed_generation: u64,
    /// Name of the HPA object this reconciler owns and manages.
    pub hpa_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScaledObject {
    pub metadata: Metadata,
    pub spec: ScaledObjectSpec,
    #[serde(default)]
    pub status: ScaledObjectStatus,
}

impl ScaledObject {
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .get("autoscaling.keda.sh/paused")
            .map(|v| v != "false")
            .unwrap_or(false)
    }

    /// Replica count to hold the scale target at while paused, from the
    /// `autoscaling.keda.sh/paused-replicas` annotation. `None` if unset or
    /// unparseable, in which case the scale loop is simply stopped in
    /// place rather than driving the target to a specific count.
    pub fn paused_replicas(&self) -> Option<u32> {
        self.metadata
            .annotations
            .get("autoscaling.keda.sh/paused-replicas")
            .and_then(|v| v.parse().ok())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.spec.triggers.is_empty() {
            return Err("ScaledObject must declare at least one trigger".to_string());
        }
        if self.spec.min_replica_count > self.spec.max_replica_count {
            return Err("minReplicaCount must be <= maxReplicaCount".to_string());
        }
        if let Some(fallback) = &self.spec.fallback {
            if fallback.failure_threshold < 1 {
                return Err("fallback.failureThreshold must be >= 1".to_string());
            }
            if self.spec.triggers.iter().any(|t| t.effective_metric_type() != MetricType::AverageValue) {
                return Err("fallback cannot be configured alongside a Value or Utilization trigger".to_string());
            }
        }
        let has_utilization = self.spec.triggers.iter().any(|t| t.effective_metric_type() == MetricType::Utilization);
        let has_average_value = self.spec.triggers.iter().any(|t| t.effective_metric_type() == MetricType::AverageValue);
        if has_utilization && has_average_value {
            return Err("triggers must not mix Utilization with AverageValue metric types".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Labels;
    use std::collections::HashMap;

    fn sample() -> ScaledObject {
        ScaledObject {
            metadata: Metadata {
                name: "orders-worker".to_string(),
                namespace: "default".to_string(),
                labels: Labels(HashMap::new()),
                ..Default::default()
            },
            spec: ScaledObjectSpec {
                triggers: vec![TriggerSpec::default()],
                ..Default::default()
            },
            status: ScaledObjectStatus::default(),
        }
    }

    #[test]
    fn rejects_empty_triggers() {
        let mut object = sample();
        object.spec.triggers.clear();
        assert!(object.validate().is_err());
    }

    #[test]
    fn rejects_inverted_replica_bounds() {
        let mut object = sample();
        object.spec.min_replica_count = 5;
        object.spec.max_replica_count = 1;
        assert!(object.validate().is_err());
    }

    #[test]
    fn paused_annotation_detected() {
        let mut object = sample();
        object
            .metadata
            .annotations
            .insert("autoscaling.keda.sh/paused".to_string(), "true".to_string());
        assert!(object.is_paused());
    }

    #[test]
    fn paused_replicas_annotation_parsed() {
        let mut object = sample();
        object
            .metadata
            .annotations
            .insert("autoscaling.keda.sh/paused-replicas".to_string(), "3".to_string());
        assert_eq!(object.paused_replicas(), Some(3));
    }

    #[test]
    fn rejects_fallback_with_value_trigger() {
        let mut object = sample();
        object.spec.triggers[0].metric_type = Some(MetricType::Value);
        object.spec.fallback = Some(Fallback::default());
        assert!(object.validate().is_err());
    }

    #[test]
    fn rejects_mixed_utilization_and_average_value_triggers() {
        let mut object = sample();
        object.spec.triggers = vec![
            TriggerSpec { metric_type: Some(MetricType::Utilization), ..Default::default() },
            TriggerSpec { metric_type: Some(MetricType::AverageValue), ..Default::default() },
        ];
        assert!(object.validate().is_err());
    }
}
