use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveTime};

use crate::{
    objects::{
        metrics::{ExternalMetricValue, MetricSpec},
        trigger::{MetricType, TriggerSpec},
    },
    scaling::scaler::Scaler,
};

/// Active during a fixed daily `[start, end)` window; desired replicas is
/// a flat count during the window and zero outside it. Does no network
/// I/O, which makes it useful both as a real trigger type and as the
/// deterministic scaler exercised by tests.
pub struct CronScaler {
    metric_name: String,
    start: NaiveTime,
    end: NaiveTime,
    desired_replicas: f64,
}

fn parse_time(metadata: &TriggerSpec, key: &str) -> Result<NaiveTime> {
    let raw = metadata
        .metadata
        .get(key)
        .with_context(|| format!("cron trigger missing '{}'", key))?;
    NaiveTime::parse_from_str(raw, "%H:%M").with_context(|| format!("invalid time in '{}': {}", key, raw))
}

pub fn build(index: usize, trigger: &TriggerSpec) -> Result<Box<dyn Scaler>> {
    let start = parse_time(trigger, "start")?;
    let end = parse_time(trigger, "end")?;
    let desired_replicas: f64 = trigger
        .metadata
        .get("desiredReplicas")
        .with_context(|| "cron trigger missing 'desiredReplicas'")?
        .parse()
        .with_context(|| "desiredReplicas must be a number")?;

    Ok(Box::new(CronScaler {
        metric_name: trigger.metric_name(index),
        start,
        end,
        desired_replicas,
    }))
}

impl CronScaler {
    fn in_window(&self) -> bool {
        let now = Local::now().time();
        if self.start <= self.end {
            now >= self.start && now < self.end
        } else {
            // window wraps past midnight
            now >= self.start || now < self.end
        }
    }
}

#[async_trait]
impl Scaler for CronScaler {
    fn get_metric_spec(&self) -> Vec<MetricSpec> {
        vec![MetricSpec {
            metric_name: self.metric_name.clone(),
            target_value: self.desired_replicas,
            metric_type: MetricType::AverageValue,
        }]
    }

    async fn get_metrics_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<(Vec<ExternalMetricValue>, bool)> {
        let active = self.in_window();
        let value = if active { self.desired_replicas } else { 0.0 };
        let sample = ExternalMetricValue::new(metric_name, value, Local::now().naive_local());
        Ok((vec![sample], active))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn trigger(start: &str, end: &str, desired: &str) -> TriggerSpec {
        let mut metadata = HashMap::new();
        metadata.insert("start".to_string(), start.to_string());
        metadata.insert("end".to_string(), end.to_string());
        metadata.insert("desiredReplicas".to_string(), desired.to_string());
        TriggerSpec { type_: "cron".to_string(), metadata, ..Default::default() }
    }

    #[test]
    fn rejects_missing_fields() {
        let trigger = TriggerSpec { type_: "cron".to_string(), ..Default::default() };
        assert!(build(0, &trigger).is_err());
    }

    #[tokio::test]
    async fn always_active_window_reports_active() {
        let scaler = build(0, &trigger("00:00", "23:59", "3")).unwrap();
        let (values, active) = scaler.get_metrics_and_activity("s0-cron-default").await.unwrap();
        assert!(active);
        assert_eq!(values[0].value, 3.0);
    }
}
