use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::objects::{metrics::{ExternalMetricValue, MetricSpec}, trigger::TriggerSpec};

/// The four operations every scaler implementation -- whichever trigger
/// type it serves -- must provide. `get_metrics_and_activity` is the only
/// one expected to do I/O; `close` is called exactly once by the cache
/// when the owning entry is evicted.
#[async_trait]
pub trait Scaler: Send + Sync {
    fn get_metric_spec(&self) -> Vec<MetricSpec>;

    async fn get_metrics_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<(Vec<ExternalMetricValue>, bool)>;

    async fn close(&self) -> Result<()>;
}

/// Builds a [`Scaler`] from a trigger's free-form metadata. Registered
/// under `TriggerSpec::type_` in a [`ScalerRegistry`]; real deployments
/// would register ~70 of these, one per supported external system. This
/// core ships two (see [`crate::scaling::scalers`]) sufficient to exercise
/// the contract end-to-end.
pub type ScalerFactory = fn(index: usize, trigger: &TriggerSpec) -> Result<Box<dyn Scaler>>;

#[derive(Default)]
pub struct ScalerRegistry {
    factories: HashMap<String, ScalerFactory>,
}

impl ScalerRegistry {
    pub fn new() -> Self {
        ScalerRegistry { factories: HashMap::new() }
    }

    pub fn register(&mut self, trigger_type: &str, factory: ScalerFactory) {
        self.factories.insert(trigger_type.to_string(), factory);
    }

    pub fn build(&self, index: usize, trigger: &TriggerSpec) -> Result<Box<dyn Scaler>> {
        let factory = self
            .factories
            .get(&trigger.type_)
            .ok_or_else(|| anyhow::anyhow!("no scaler registered for trigger type {:?}", trigger.type_))?;
        factory(index, trigger)
    }

    /// The registry this core ships out of the box: `cron` and
    /// `external-http`. A production deployment would register every
    /// concrete scaler here at startup.
    pub fn with_builtin_scalers() -> Self {
        let mut registry = Self::new();
        registry.register("cron", crate::scaling::scalers::cron::build);
        registry.register("external-http", crate::scaling::scalers::external_http::build);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_trigger_type_is_an_error() {
        let registry = ScalerRegistry::with_builtin_scalers();
        let trigger = TriggerSpec { type_: "rabbitmq".to_string(), ..Default::default() };
        assert!(registry.build(0, &trigger).is_err());
    }

    #[test]
    fn builtin_scalers_are_registered() {
        let registry = ScalerRegistry::with_builtin_scalers();
        let cron = TriggerSpec { type_: "cron".to_string(), ..Default::default() };
        assert!(registry.build(0, &cron).is_ok());
    }
}
