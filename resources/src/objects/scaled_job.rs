use serde::{Deserialize, Serialize};
use strum::Display;

use crate::objects::{conditions::Conditions, object_reference::ObjectReference, trigger::TriggerSpec, Metadata};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum RolloutStrategy {
    Immediate,
    Gradual,
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        RolloutStrategy::Gradual
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScalingStrategyKind {
    Default,
    Accurate,
    Custom,
}

impl Default for ScalingStrategyKind {
    fn default() -> Self {
        ScalingStrategyKind::Default
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingStrategy {
    pub strategy: ScalingStrategyKind,
    /// Only meaningful when `strategy == Custom`; a ratio-based formula
    /// string evaluated by a custom scaling hook outside the core.
    pub custom_scaling_queue_length_deduction: Option<i64>,
}

fn default_max_replicas() -> u32 {
    100
}

fn default_polling_interval() -> u64 {
    30
}

fn default_successful_jobs_history_limit() -> u32 {
    5
}

fn default_failed_jobs_history_limit() -> u32 {
    5
}

/// The pod template a ScaledJob stamps out for each unit of work. The
/// actual container spec is left as an opaque JSON document -- the core
/// never interprets it, only copies it onto the Jobs it creates.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobTargetRef {
    pub template: serde_json::Value,
    pub back_off_limit: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledJobSpec {
    pub job_target_ref: JobTargetRef,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_max_replicas")]
    pub max_replica_count: u32,
    pub min_replica_count: u32,
    #[serde(default = "default_successful_jobs_history_limit")]
    pub successful_jobs_history_limit: u32,
    #[serde(default = "default_failed_jobs_history_limit")]
    pub failed_jobs_history_limit: u32,
    pub rollout_strategy: RolloutStrategy,
    pub scaling_strategy: ScalingStrategy,
    pub triggers: Vec<TriggerSpec>,
}

impl Default for ScaledJobSpec {
    fn default() -> Self {
        ScaledJobSpec {
            job_target_ref: JobTargetRef::default(),
            polling_interval: default_polling_interval(),
            max_replica_count: default_max_replicas(),
            min_replica_count: 0,
            successful_jobs_history_limit: default_successful_jobs_history_limit(),
            failed_jobs_history_limit: default_failed_jobs_history_limit(),
            rollout_strategy: RolloutStrategy::default(),
            scaling_strategy: ScalingStrategy::default(),
            triggers: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledJobStatus {
    pub conditions: Conditions,
    pub last_active_time: Option<chrono::NaiveDateTime>,
    pub observed_generation: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScaledJob {
    pub metadata: Metadata,
    pub spec: ScaledJobSpec,
    #[serde(default)]
    pub status: ScaledJobStatus,
}

impl ScaledJob {
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .get("autoscaling.keda.sh/paused")
            .map(|v| v != "false")
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.spec.triggers.is_empty() {
            return Err("ScaledJob must declare at least one trigger".to_string());
        }
        for trigger in &self.spec.triggers {
            // metricType is an HPA-facing concept; ScaledJob triggers feed
            // the job-count formula directly and must not carry one.
            if trigger.metric_type.is_some() {
                return Err(format!("trigger {:?} on ScaledJob must not set metricType", trigger.name));
            }
            if trigger.use_cached_metrics {
                return Err(format!("trigger {:?} on ScaledJob must not set useCachedMetrics", trigger.name));
            }
        }
        if self.spec.min_replica_count > self.spec.max_replica_count {
            return Err("minReplicaCount must be <= maxReplicaCount".to_string());
        }
        Ok(())
    }

    /// Label applied to every Job this object owns, used both to stamp new
    /// Jobs and to find existing ones to clean up on rollout.
    pub fn owned_job_label(&self) -> (String, String) {
        ("scaledjob.keda.sh/name".to_string(), self.metadata.name.clone())
    }

    /// Labels stamped onto every Job created for this generation, so an
    /// `immediate` rollout can select and delete only the Jobs created
    /// under the *previous* generation.
    pub fn owned_job_labels(&self) -> std::collections::HashMap<String, String> {
        let mut labels = std::collections::HashMap::new();
        let (k, v) = self.owned_job_label();
        labels.insert(k, v);
        labels.insert("scaledjob.keda.sh/generation".to_string(), self.metadata.generation.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Labels;
    use std::collections::HashMap;

    fn sample() -> ScaledJob {
        ScaledJob {
            metadata: Metadata {
                name: "batch-worker".to_string(),
                namespace: "default".to_string(),
                labels: Labels(HashMap::new()),
                ..Default::default()
            },
            spec: ScaledJobSpec {
                triggers: vec![TriggerSpec::default()],
                ..Default::default()
            },
            status: ScaledJobStatus::default(),
        }
    }

    #[test]
    fn rejects_empty_triggers() {
        let mut job = sample();
        job.spec.triggers.clear();
        assert!(job.validate().is_err());
    }

    #[test]
    fn owned_job_label_matches_name() {
        let job = sample();
        assert_eq!(job.owned_job_label(), ("scaledjob.keda.sh/name".to_string(), "batch-worker".to_string()));
    }

    #[test]
    fn rejects_trigger_carrying_metric_type() {
        let mut job = sample();
        job.spec.triggers[0].metric_type = Some(crate::objects::trigger::MetricType::Utilization);
        assert!(job.validate().is_err());
    }

    #[test]
    fn rejects_use_cached_metrics() {
        let mut job = sample();
        job.spec.triggers[0].use_cached_metrics = true;
        assert!(job.validate().is_err());
    }
}
