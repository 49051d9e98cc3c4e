use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;

use crate::{
    objects::{
        metrics::{ExternalMetricValue, MetricSpec},
        trigger::{MetricType, TriggerSpec},
    },
    scaling::scaler::Scaler,
};

/// Polls an HTTP endpoint that returns a bare JSON number and treats it as
/// the current metric value. Mirrors the shape of a real `external`
/// scaler without requiring a gRPC server to exercise the contract.
pub struct ExternalHttpScaler {
    metric_name: String,
    target_url: String,
    target_value: f64,
    client: Client,
}

pub fn build(index: usize, trigger: &TriggerSpec) -> Result<Box<dyn Scaler>> {
    let target_url = trigger
        .metadata
        .get("targetUrl")
        .with_context(|| "external-http trigger missing 'targetUrl'")?
        .clone();
    let target_value: f64 = trigger
        .metadata
        .get("targetValue")
        .with_context(|| "external-http trigger missing 'targetValue'")?
        .parse()
        .with_context(|| "targetValue must be a number")?;

    Ok(Box::new(ExternalHttpScaler {
        metric_name: trigger.metric_name(index),
        target_url,
        target_value,
        client: Client::new(),
    }))
}

#[async_trait]
impl Scaler for ExternalHttpScaler {
    fn get_metric_spec(&self) -> Vec<MetricSpec> {
        vec![MetricSpec {
            metric_name: self.metric_name.clone(),
            target_value: self.target_value,
            metric_type: MetricType::AverageValue,
        }]
    }

    async fn get_metrics_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<(Vec<ExternalMetricValue>, bool)> {
        let value: f64 = self
            .client
            .get(&self.target_url)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.target_url))?
            .json()
            .await
            .with_context(|| "external endpoint did not return a bare number")?;
        let sample = ExternalMetricValue::new(metric_name, value, Local::now().naive_local());
        Ok((vec![sample], value > 0.0))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rejects_missing_target_url() {
        let trigger = TriggerSpec { type_: "external-http".to_string(), ..Default::default() };
        assert!(build(0, &trigger).is_err());
    }

    #[test]
    fn builds_with_valid_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("targetUrl".to_string(), "http://metrics.local/queue-length".to_string());
        metadata.insert("targetValue".to_string(), "10".to_string());
        let trigger = TriggerSpec { type_: "external-http".to_string(), metadata, ..Default::default() };
        assert!(build(0, &trigger).is_ok());
    }
}
