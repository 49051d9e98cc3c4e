use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;

/// How a trigger's metric value should be interpreted by the HPA:
/// `AverageValue` divides by replica count before comparing to target,
/// `Value` and `Utilization` do not. Fallback only applies to
/// `AverageValue` triggers (see [`crate::objects::scaled_object::Fallback`]).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum MetricType {
    AverageValue,
    Value,
    Utilization,
}

/// One entry in a scalable object's `triggers` list: selects a scaler type
/// by name and supplies its free-form configuration. `metadata` is
/// deliberately untyped since the core never interprets it directly -- the
/// scaler factory registered under `type` does.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Only meaningful on a `ScaledObject` trigger, where it's forwarded to
    /// the owned HPA's external metric. `None` means the author left it
    /// unset; a `ScaledJob` trigger carrying `Some(_)` is a validation
    /// error since job scaling has no HPA to hand it to.
    pub metric_type: Option<MetricType>,
    pub use_cached_metrics: bool,
    pub authentication_ref: Option<String>,
}

impl Default for TriggerSpec {
    fn default() -> Self {
        TriggerSpec {
            type_: String::new(),
            name: None,
            metadata: HashMap::new(),
            metric_type: None,
            use_cached_metrics: false,
            authentication_ref: None,
        }
    }
}

impl TriggerSpec {
    /// The metric type to apply when building the owned HPA's external
    /// metric: the author's explicit choice, or `AverageValue` if unset.
    pub fn effective_metric_type(&self) -> MetricType {
        self.metric_type.unwrap_or(MetricType::AverageValue)
    }

    /// Derives the metric name this trigger's scaler must serve, as
    /// `s{index}-{type}-{discriminator}`. `discriminator` is scaler-chosen;
    /// here it falls back to the trigger's explicit `name`, then to the
    /// raw metadata so two triggers of the same type still get distinct
    /// names without requiring the author to set one.
    pub fn metric_name(&self, index: usize) -> String {
        let discriminator = self
            .name
            .clone()
            .unwrap_or_else(|| self.default_discriminator());
        format!("s{}-{}-{}", index, self.type_, discriminator)
    }

    fn default_discriminator(&self) -> String {
        let mut keys: Vec<&String> = self.metadata.keys().collect();
        keys.sort();
        keys.into_iter()
            .next()
            .and_then(|k| self.metadata.get(k))
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_name_prefers_explicit_name() {
        let trigger = TriggerSpec {
            type_: "cron".to_string(),
            name: Some("business-hours".to_string()),
            ..Default::default()
        };
        assert_eq!(trigger.metric_name(0), "s0-cron-business-hours");
    }

    #[test]
    fn metric_name_falls_back_to_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("queueName".to_string(), "orders".to_string());
        let trigger = TriggerSpec {
            type_: "external-http".to_string(),
            metadata,
            ..Default::default()
        };
        assert_eq!(trigger.metric_name(2), "s2-external-http-orders");
    }
}
