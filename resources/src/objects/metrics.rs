use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::objects::trigger::MetricType;

/// What `Scaler::get_metric_spec` reports: the name the HPA should query
/// this trigger's metric under, and the target it should scale towards.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    pub metric_name: String,
    pub target_value: f64,
    pub metric_type: MetricType,
}

/// One sample a scaler reports for a metric name, in the shape the
/// external-metrics API serves it.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValue {
    pub metric_name: String,
    pub value: f64,
    pub timestamp: NaiveDateTime,
}

impl ExternalMetricValue {
    pub fn new(metric_name: impl Into<String>, value: f64, timestamp: NaiveDateTime) -> Self {
        ExternalMetricValue {
            metric_name: metric_name.into(),
            value,
            timestamp,
        }
    }
}
