use std::collections::HashMap;

use chrono::{Duration, Local, NaiveDateTime};
use resources::{
    objects::{
        object_reference::ObjectReference,
        scaled_object::{Fallback, FallbackBehavior, ScaledObject},
        trigger::MetricType,
    },
    scaling::{
        cache::{per_call_timeout, ScalersCache},
        executor::{ScaleDecision, ScaleExecutor},
        scaler::ScalerRegistry,
        target_resolver::TargetResolver,
    },
};
use tokio::sync::RwLock;

/// Per-object ScaleLoop state and the cache/executor it drives. One
/// `ScaleHandler` is shared by every ScaleLoop task; per-object state
/// lives in `last_active_time`, keyed the same way as the cache.
pub struct ScaleHandler {
    cache: ScalersCache,
    resolver: TargetResolver,
    last_active_time: RwLock<HashMap<String, NaiveDateTime>>,
}

fn cache_key(object: &ScaledObject) -> String {
    format!("scaledobjects/{}/{}", object.metadata.namespace, object.metadata.name)
}

/// Applies the fallback formula when a trigger's consecutive
/// failures have crossed `fallback.failure_threshold`. Only meaningful
/// for `AverageValue` metrics; other metric types simply surface the
/// error untouched.
fn fallback_value(fallback: &Fallback, current_replicas: u32, target_value: f64) -> f64 {
    let replicas = match fallback.behavior {
        FallbackBehavior::Static => fallback.replicas,
        FallbackBehavior::CurrentReplicas => current_replicas,
        FallbackBehavior::CurrentReplicasIfHigher => current_replicas.max(fallback.replicas),
        FallbackBehavior::CurrentReplicasIfLower => current_replicas.min(fallback.replicas),
    };
    replicas as f64 * target_value
}

pub struct TickOutcome {
    pub is_active: bool,
    pub fallback_engaged: bool,
    pub decision: ScaleDecision,
}

impl ScaleHandler {
    pub fn new(resolver: TargetResolver, registry: ScalerRegistry, scaler_close_timeout: std::time::Duration) -> Self {
        ScaleHandler {
            cache: ScalersCache::new(registry, scaler_close_timeout),
            resolver,
            last_active_time: RwLock::new(HashMap::new()),
        }
    }

    pub async fn delete(&self, object: &ScaledObject) {
        self.cache.delete(&cache_key(object)).await;
        self.last_active_time.write().await.remove(&cache_key(object));
    }

    /// One ScaleLoop tick: polls every trigger's scaler, applies fallback
    /// to triggers that have exceeded their failure threshold, derives
    /// activity, and hands the from-zero/to-zero decision to the executor.
    pub async fn tick(&self, object: &ScaledObject, current_replicas: u32) -> anyhow::Result<TickOutcome> {
        let key = cache_key(object);
        self.cache
            .get_or_build(&key, object.metadata.generation, &object.spec.triggers)
            .await;

        let mut any_active = false;
        let mut fallback_engaged = false;

        for (index, trigger) in object.spec.triggers.iter().enumerate() {
            let metric_name = trigger.metric_name(index);
            let use_cached = trigger
                .use_cached_metrics
                .then(|| std::time::Duration::from_secs(object.spec.polling_interval));
            let call_timeout = per_call_timeout(object.spec.polling_interval);

            match self.cache.get_metrics_and_activity_for_scaler(&key, &metric_name, use_cached, call_timeout).await {
                Ok((_, active)) => any_active |= active,
                Err(e) => {
                    tracing::debug!("scaler {} errored this tick: {:#}", metric_name, e);
                    if let Some(fallback) = &object.spec.fallback {
                        let failures = self.cache.consecutive_failures(&key, &metric_name).await;
                        if trigger.effective_metric_type() == MetricType::AverageValue && failures >= fallback.failure_threshold {
                            let target_value = self.cache.target_value(&key, &metric_name).await.unwrap_or(1.0);
                            let value = fallback_value(fallback, current_replicas, target_value);
                            self.cache.set_fallback_reading(&key, &metric_name, value).await;
                            fallback_engaged = true;
                            any_active = true;
                        }
                    }
                },
            }
        }

        let now = Local::now().naive_local();
        let mut last_active = self.last_active_time.write().await;
        if any_active {
            last_active.insert(key.clone(), now);
        }
        let last_active_time = last_active.get(&key).copied();
        drop(last_active);

        let decision = ScaleExecutor::decide(
            current_replicas,
            any_active,
            last_active_time,
            now,
            object.spec.min_replica_count,
            object.spec.idle_replica_count,
            Duration::seconds(object.spec.cooldown_period as i64),
        );

        if decision != ScaleDecision::NoOp {
            let executor = ScaleExecutor::new(&self.resolver);
            executor.apply(&object.spec.scale_target_ref, decision).await?;
        }

        Ok(TickOutcome { is_active: any_active, fallback_engaged, decision })
    }

    pub async fn get_scale(&self, target: &ObjectReference) -> anyhow::Result<u32> {
        Ok(self.resolver.get_scale(target).await.map(|s| s.current_replicas)?)
    }

    /// Drives the scale target to a fixed replica count while the owning
    /// object is paused, independent of the (stopped) scale loop.
    pub async fn set_paused_replicas(&self, target: &ObjectReference, replicas: u32) -> anyhow::Result<()> {
        Ok(self.resolver.set_replicas(target, replicas).await?)
    }

    pub async fn cache_target_value(&self, object: &ScaledObject, metric_name: &str) -> Option<f64> {
        self.cache.target_value(&cache_key(object), metric_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_fallback_uses_configured_replicas() {
        let fallback = Fallback { failure_threshold: 3, replicas: 4, behavior: FallbackBehavior::Static };
        assert_eq!(fallback_value(&fallback, 1, 5.0), 20.0);
    }

    #[test]
    fn current_replicas_if_higher_picks_the_max() {
        let fallback = Fallback { failure_threshold: 3, replicas: 2, behavior: FallbackBehavior::CurrentReplicasIfHigher };
        assert_eq!(fallback_value(&fallback, 5, 1.0), 5.0);
        assert_eq!(fallback_value(&fallback, 1, 1.0), 2.0);
    }

    #[test]
    fn current_replicas_if_lower_picks_the_min() {
        let fallback = Fallback { failure_threshold: 3, replicas: 2, behavior: FallbackBehavior::CurrentReplicasIfLower };
        assert_eq!(fallback_value(&fallback, 5, 1.0), 2.0);
        assert_eq!(fallback_value(&fallback, 1, 1.0), 1.0);
    }
}
