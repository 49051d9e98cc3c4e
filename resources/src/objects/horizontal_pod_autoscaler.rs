use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::objects::{object_reference::ObjectReference, trigger::MetricType, Metadata};

/// The external-metric reference an owned HPA scales against. The actual
/// scale-velocity/stabilization-window math is the Kubernetes-native HPA
/// controller's job; this core only ever generates and owns this object,
/// it never evaluates it.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricSource {
    pub metric_name: String,
    pub target_value: f64,
    pub metric_type: MetricType,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct HorizontalPodAutoscalerSpec {
    pub scale_target_ref: ObjectReference,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub metrics: Vec<ExternalMetricSource>,
}

impl Default for HorizontalPodAutoscalerSpec {
    fn default() -> Self {
        HorizontalPodAutoscalerSpec {
            scale_target_ref: ObjectReference::default(),
            min_replicas: 1,
            max_replicas: 1,
            metrics: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HorizontalPodAutoscalerStatus {
    pub desired_replicas: u32,
    pub current_replicas: u32,
    pub last_scale_time: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HorizontalPodAutoscaler {
    pub metadata: Metadata,
    pub spec: HorizontalPodAutoscalerSpec,
    #[serde(default)]
    pub status: HorizontalPodAutoscalerStatus,
}

impl HorizontalPodAutoscaler {
    /// Builds the HPA this core owns for a given ScaledObject, carrying a
    /// controller owner reference so garbage collection is automatic when
    /// the ScaledObject is deleted.
    pub fn for_scaled_object(
        scaled_object_name: &str,
        namespace: &str,
        scale_target_ref: ObjectReference,
        min_replicas: u32,
        max_replicas: u32,
        metrics: Vec<ExternalMetricSource>,
    ) -> Self {
        let mut metadata = Metadata {
            name: format!("keda-hpa-{}", scaled_object_name),
            namespace: namespace.to_string(),
            ..Default::default()
        };
        metadata.owner_references.push(ObjectReference {
            kind: "ScaledObject".to_string(),
            name: scaled_object_name.to_string(),
            namespace: namespace.to_string(),
            api_version: "keda.sh/v1alpha1".to_string(),
        });
        HorizontalPodAutoscaler {
            metadata,
            spec: HorizontalPodAutoscalerSpec {
                scale_target_ref,
                min_replicas,
                max_replicas,
                metrics,
            },
            status: HorizontalPodAutoscalerStatus::default(),
        }
    }

    /// Whether regenerating the HPA spec for the current ScaledObject
    /// generation would differ from what's live, so the reconciler only
    /// patches on real change.
    pub fn spec_differs(&self, other: &HorizontalPodAutoscalerSpec) -> bool {
        self.spec.min_replicas != other.min_replicas
            || self.spec.max_replicas != other.max_replicas
            || self.spec.scale_target_ref != other.scale_target_ref
            || self.spec.metrics.len() != other.metrics.len()
            || self
                .spec
                .metrics
                .iter()
                .zip(other.metrics.iter())
                .any(|(a, b)| a.metric_name != b.metric_name || a.target_value != b.target_value)
    }
}
