use resources::{
    objects::{
        scaled_job::{ScaledJob, ScalingStrategyKind},
        trigger::TriggerSpec,
    },
    scaling::{
        cache::{per_call_timeout, ScalersCache},
        scaler::ScalerRegistry,
    },
};

fn cache_key(job: &ScaledJob) -> String {
    format!("scaledjobs/{}/{}", job.metadata.namespace, job.metadata.name)
}

pub struct ScaleHandler {
    cache: ScalersCache,
}

pub struct TickOutcome {
    pub desired_new_jobs: u32,
    pub is_active: bool,
}

impl ScaleHandler {
    pub fn new(registry: ScalerRegistry, scaler_close_timeout: std::time::Duration) -> Self {
        ScaleHandler { cache: ScalersCache::new(registry, scaler_close_timeout) }
    }

    pub async fn delete(&self, job: &ScaledJob) {
        self.cache.delete(&cache_key(job)).await;
    }

    /// One ScaleLoop tick: for every trigger, read its current value and
    /// divide by its declared target to get a replica hint, take the
    /// largest across triggers, cap at `maxReplicaCount`, then subtract
    /// according to `scalingStrategy`. `running_jobs`/`pending_jobs` split
    /// the caller's job count by phase so `accurate` can subtract only
    /// `Running` jobs while `default` subtracts every non-terminal one.
    pub async fn tick(&self, job: &ScaledJob, running_jobs: u32, pending_jobs: u32) -> anyhow::Result<TickOutcome> {
        let key = cache_key(job);
        self.cache.get_or_build(&key, job.metadata.generation, &job.spec.triggers).await;
        let call_timeout = per_call_timeout(job.spec.polling_interval);

        let mut max_hint: u32 = 0;
        let mut is_active = false;

        for (index, trigger) in job.spec.triggers.iter().enumerate() {
            let metric_name = trigger.metric_name(index);
            match self.cache.get_metrics_and_activity_for_scaler(&key, &metric_name, None, call_timeout).await {
                Ok((values, active)) => {
                    is_active |= active;
                    let target = self.cache.target_value(&key, &metric_name).await.unwrap_or(1.0).max(1.0);
                    let hint = values
                        .iter()
                        .map(|v| (v.value / target).ceil().max(0.0) as u32)
                        .max()
                        .unwrap_or(0);
                    max_hint = max_hint.max(hint);
                },
                Err(e) => tracing::debug!("trigger {:?} errored this tick: {:#}", trigger.name, e),
            }
        }

        let capped_hint = max_hint.min(job.spec.max_replica_count);
        let desired_new_jobs = match job.spec.scaling_strategy.strategy {
            ScalingStrategyKind::Default => capped_hint.saturating_sub(running_jobs + pending_jobs),
            ScalingStrategyKind::Accurate => capped_hint.saturating_sub(running_jobs),
            ScalingStrategyKind::Custom => {
                // Out-of-core-scope formula hook: a real deployment plugs a
                // user-supplied expression in here. Until then the only
                // knob this strategy exposes is a flat deduction on top of
                // the default formula.
                let deduction = job
                    .spec
                    .scaling_strategy
                    .custom_scaling_queue_length_deduction
                    .unwrap_or(0)
                    .max(0) as u32;
                capped_hint.saturating_sub(running_jobs + pending_jobs).saturating_sub(deduction)
            },
        };

        Ok(TickOutcome { desired_new_jobs, is_active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resources::objects::{scaled_job::{ScaledJobSpec, ScalingStrategy}, Metadata};

    fn trigger_with_target(target: &str) -> TriggerSpec {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("targetUrl".to_string(), "http://metrics.local/queue".to_string());
        metadata.insert("targetValue".to_string(), target.to_string());
        TriggerSpec { type_: "external-http".to_string(), metadata, ..Default::default() }
    }

    fn always_on_cron_trigger() -> TriggerSpec {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("start".to_string(), "00:00".to_string());
        metadata.insert("end".to_string(), "23:59".to_string());
        metadata.insert("desiredReplicas".to_string(), "1".to_string());
        TriggerSpec { type_: "cron".to_string(), metadata, ..Default::default() }
    }

    fn sample_job(strategy: ScalingStrategyKind) -> ScaledJob {
        ScaledJob {
            metadata: Metadata { name: "batch".to_string(), ..Default::default() },
            spec: ScaledJobSpec {
                max_replica_count: 100,
                scaling_strategy: ScalingStrategy { strategy, custom_scaling_queue_length_deduction: None },
                triggers: vec![always_on_cron_trigger()],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    #[test]
    fn scaling_strategy_kind_defaults_to_default() {
        assert_eq!(ScalingStrategyKind::default(), ScalingStrategyKind::Default);
    }

    #[test]
    fn trigger_helper_builds_a_valid_trigger() {
        let trigger = trigger_with_target("5");
        assert_eq!(trigger.metadata.get("targetValue").unwrap(), "5");
    }

    #[tokio::test]
    async fn default_strategy_subtracts_running_and_pending() {
        let handler = ScaleHandler::new(ScalerRegistry::with_builtin_scalers(), std::time::Duration::from_secs(5));
        let job = sample_job(ScalingStrategyKind::Default);
        let outcome = handler.tick(&job, 0, 1).await.unwrap();
        assert_eq!(outcome.desired_new_jobs, 0);
    }

    #[tokio::test]
    async fn accurate_strategy_ignores_pending_jobs() {
        let handler = ScaleHandler::new(ScalerRegistry::with_builtin_scalers(), std::time::Duration::from_secs(5));
        let job = sample_job(ScalingStrategyKind::Accurate);
        let outcome = handler.tick(&job, 0, 1).await.unwrap();
        assert_eq!(outcome.desired_new_jobs, 1);
    }
}
