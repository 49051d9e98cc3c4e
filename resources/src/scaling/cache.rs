use std::{sync::Arc, time::Duration};

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    objects::{metrics::ExternalMetricValue, trigger::TriggerSpec},
    scaling::scaler::{Scaler, ScalerRegistry},
};

/// One trigger's built scaler plus the health bookkeeping the handler and
/// the fallback formula need.
pub struct BuiltScaler {
    pub trigger: TriggerSpec,
    pub metric_name: String,
    pub scaler: Option<Box<dyn Scaler>>,
    pub build_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_reading: Option<(Vec<ExternalMetricValue>, bool, NaiveDateTime)>,
}

impl BuiltScaler {
    fn broken(trigger: TriggerSpec, metric_name: String, error: String) -> Self {
        BuiltScaler {
            trigger,
            metric_name,
            scaler: None,
            build_error: Some(error),
            consecutive_failures: 0,
            last_reading: None,
        }
    }
}

/// The live state cached for one scalable object: its scalers, built at a
/// known generation, each carrying its own failure count so one broken
/// trigger never blocks the others.
pub struct CacheEntry {
    pub generation: u64,
    pub scalers: Vec<BuiltScaler>,
}

impl CacheEntry {
    fn build(registry: &ScalerRegistry, generation: u64, triggers: &[TriggerSpec]) -> Self {
        let scalers = triggers
            .iter()
            .enumerate()
            .map(|(index, trigger)| {
                let metric_name = trigger.metric_name(index);
                match registry.build(index, trigger) {
                    Ok(scaler) => BuiltScaler {
                        trigger: trigger.clone(),
                        metric_name,
                        scaler: Some(scaler),
                        build_error: None,
                        consecutive_failures: 0,
                        last_reading: None,
                    },
                    Err(e) => BuiltScaler::broken(trigger.clone(), metric_name, e.to_string()),
                }
            })
            .collect();
        CacheEntry { generation, scalers }
    }

    /// Re-attempts any scaler whose factory previously failed, without
    /// disturbing scalers that already built successfully.
    fn retry_broken(&mut self, registry: &ScalerRegistry) {
        for (index, built) in self.scalers.iter_mut().enumerate() {
            if built.scaler.is_none() {
                match registry.build(index, &built.trigger) {
                    Ok(scaler) => {
                        built.scaler = Some(scaler);
                        built.build_error = None;
                    },
                    Err(e) => built.build_error = Some(e.to_string()),
                }
            }
        }
    }

    /// Closes every built scaler, bounding each call at `close_timeout` so
    /// one wedged scaler can't stall the rest of the entry's teardown.
    async fn close_all(&mut self, close_timeout: Duration) {
        for built in &mut self.scalers {
            if let Some(scaler) = &built.scaler {
                match tokio::time::timeout(close_timeout, scaler.close()).await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => tracing::warn!("scaler close failed for {}: {:#}", built.metric_name, e),
                    Err(_) => tracing::warn!(
                        "scaler close for {} exceeded {:?}, dropping reference",
                        built.metric_name,
                        close_timeout
                    ),
                }
            }
        }
    }
}

/// The per-call deadline for a scaler invocation: half the `pollingInterval`,
/// floored at 5 seconds so a short interval never starves I/O entirely.
pub fn per_call_timeout(polling_interval_seconds: u64) -> Duration {
    Duration::from_secs((polling_interval_seconds / 2).max(5))
}

/// Process-wide cache keyed by scalable-object identity (`{kind}/{namespace}/{name}`).
/// The outer map is a [`DashMap`] so unrelated keys never contend; each slot
/// carries its own [`Mutex`] guarding an `Option<CacheEntry>`, held across
/// the whole check-then-build-then-store sequence, so concurrent callers
/// for the *same* key during a build simply wait for it instead of both
/// building and both closing the same scalers.
pub struct ScalersCache {
    registry: ScalerRegistry,
    entries: DashMap<String, Arc<Mutex<Option<CacheEntry>>>>,
    close_timeout: Duration,
}

impl ScalersCache {
    pub fn new(registry: ScalerRegistry, close_timeout: Duration) -> Self {
        ScalersCache { registry, entries: DashMap::new(), close_timeout }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<Option<CacheEntry>>> {
        self.entries.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
    }

    /// Returns the entry for `key`, building or rebuilding it if absent or
    /// if `generation` has moved on since it was built. Constituent
    /// scalers of a stale entry are closed before it is replaced. The
    /// per-key lock is held for the whole check-then-build-then-store
    /// sequence, so a second caller racing the same key blocks on the
    /// first build rather than starting its own.
    pub async fn get_or_build(&self, key: &str, generation: u64, triggers: &[TriggerSpec]) -> Arc<Mutex<Option<CacheEntry>>> {
        let slot = self.slot(key);
        {
            let mut guard = slot.lock().await;
            let stale = match &*guard {
                Some(entry) => entry.generation != generation,
                None => true,
            };
            if stale {
                if let Some(mut old) = guard.take() {
                    old.close_all(self.close_timeout).await;
                }
                *guard = Some(CacheEntry::build(&self.registry, generation, triggers));
            }
        }
        slot
    }

    /// Retries any scaler in `key`'s entry whose factory previously
    /// failed. A no-op if the key has no entry yet.
    pub async fn retry_broken(&self, key: &str) {
        if let Some(entry) = self.entries.get(key) {
            if let Some(ce) = entry.lock().await.as_mut() {
                ce.retry_broken(&self.registry);
            }
        }
    }

    /// Returns the current `consecutive_failures` count for `metric_name`,
    /// used by the handler to decide whether fallback should engage.
    pub async fn consecutive_failures(&self, key: &str, metric_name: &str) -> u32 {
        match self.entries.get(key) {
            Some(entry) => entry
                .lock()
                .await
                .as_ref()
                .and_then(|ce| ce.scalers.iter().find(|b| b.metric_name == metric_name))
                .map(|b| b.consecutive_failures)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// The target value the owning scaler's `MetricSpec` declares for
    /// `metric_name`, used by the fallback formula. `None` if the scaler
    /// never built successfully.
    pub async fn target_value(&self, key: &str, metric_name: &str) -> Option<f64> {
        let entry = self.entries.get(key)?;
        let guard = entry.lock().await;
        let ce = guard.as_ref()?;
        let built = ce.scalers.iter().find(|b| b.metric_name == metric_name)?;
        let scaler = built.scaler.as_ref()?;
        scaler
            .get_metric_spec()
            .into_iter()
            .find(|spec| spec.metric_name == metric_name)
            .map(|spec| spec.target_value)
    }

    /// Overwrites the cached reading for `metric_name` with a synthesized
    /// fallback value, so the external metrics provider serves it
    /// unmodified on the next HPA query without knowing fallback policy
    /// itself.
    pub async fn set_fallback_reading(&self, key: &str, metric_name: &str, value: f64) {
        if let Some(entry) = self.entries.get(key) {
            let mut guard = entry.lock().await;
            if let Some(built) = guard.as_mut().and_then(|ce| ce.scalers.iter_mut().find(|b| b.metric_name == metric_name)) {
                built.last_reading = Some((
                    vec![ExternalMetricValue::new(metric_name, value, Local::now().naive_local())],
                    true,
                    Local::now().naive_local(),
                ));
            }
        }
    }

    /// Reads `metric_name`'s current value and activity, bounding the
    /// scaler call at `call_timeout` (see [`per_call_timeout`]). A timeout
    /// counts as one failure toward the trigger's `failureThreshold`, the
    /// same as any other scaler error.
    pub async fn get_metrics_and_activity_for_scaler(
        &self,
        key: &str,
        metric_name: &str,
        use_cached_within: Option<Duration>,
        call_timeout: Duration,
    ) -> anyhow::Result<(Vec<ExternalMetricValue>, bool)> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no cache entry for {}", key))?
            .clone();
        let mut guard = entry.lock().await;
        let ce = guard.as_mut().ok_or_else(|| anyhow::anyhow!("no cache entry for {}", key))?;
        let built = ce
            .scalers
            .iter_mut()
            .find(|b| b.metric_name == metric_name)
            .ok_or_else(|| anyhow::anyhow!("no scaler serves metric {}", metric_name))?;

        if let Some(window) = use_cached_within {
            if let Some((values, active, at)) = &built.last_reading {
                let age = Local::now().naive_local() - *at;
                if age.to_std().unwrap_or(window) < window {
                    return Ok((values.clone(), *active));
                }
            }
        }

        let scaler = built
            .scaler
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("scaler for {} failed to build: {:?}", metric_name, built.build_error))?;

        match tokio::time::timeout(call_timeout, scaler.get_metrics_and_activity(metric_name)).await {
            Ok(Ok((values, active))) => {
                built.consecutive_failures = 0;
                built.last_reading = Some((values.clone(), active, Local::now().naive_local()));
                Ok((values, active))
            },
            Ok(Err(e)) => {
                built.consecutive_failures += 1;
                Err(e)
            },
            Err(_) => {
                built.consecutive_failures += 1;
                Err(anyhow::anyhow!("scaler for {} exceeded its {:?} call deadline", metric_name, call_timeout))
            },
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            if let Some(mut ce) = entry.lock().await.take() {
                ce.close_all(self.close_timeout).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_cache() -> ScalersCache {
        ScalersCache::new(ScalerRegistry::with_builtin_scalers(), Duration::from_secs(5))
    }

    fn cron_trigger(desired: &str) -> TriggerSpec {
        let mut metadata = HashMap::new();
        metadata.insert("start".to_string(), "00:00".to_string());
        metadata.insert("end".to_string(), "23:59".to_string());
        metadata.insert("desiredReplicas".to_string(), desired.to_string());
        TriggerSpec { type_: "cron".to_string(), metadata, ..Default::default() }
    }

    #[tokio::test]
    async fn degraded_entry_keeps_working_scalers() {
        let cache = test_cache();
        let triggers = vec![cron_trigger("2"), TriggerSpec { type_: "unregistered".to_string(), ..Default::default() }];
        let entry = cache.get_or_build("scaledobjects/default/orders", 1, &triggers).await;
        let guard = entry.lock().await;
        let ce = guard.as_ref().unwrap();
        assert!(ce.scalers[0].scaler.is_some());
        assert!(ce.scalers[1].scaler.is_none());
    }

    #[tokio::test]
    async fn generation_change_rebuilds_entry() {
        let cache = test_cache();
        let triggers = vec![cron_trigger("2")];
        cache.get_or_build("scaledobjects/default/orders", 1, &triggers).await;
        let second = cache.get_or_build("scaledobjects/default/orders", 2, &triggers).await;
        assert_eq!(second.lock().await.as_ref().unwrap().generation, 2);
    }

    #[tokio::test]
    async fn metrics_are_routed_to_the_owning_scaler() {
        let cache = test_cache();
        let triggers = vec![cron_trigger("5")];
        let key = "scaledobjects/default/orders";
        cache.get_or_build(key, 1, &triggers).await;
        let metric_name = triggers[0].metric_name(0);
        let (values, active) = cache
            .get_metrics_and_activity_for_scaler(key, &metric_name, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(active);
        assert_eq!(values[0].value, 5.0);
    }

    #[tokio::test]
    async fn concurrent_builds_for_the_same_key_serialize() {
        let cache = Arc::new(test_cache());
        let triggers = vec![cron_trigger("2")];
        let key = "scaledobjects/default/orders";

        let (a, b) = tokio::join!(
            cache.get_or_build(key, 1, &triggers),
            cache.get_or_build(key, 1, &triggers),
        );
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn per_call_timeout_floors_at_five_seconds() {
        assert_eq!(per_call_timeout(4), Duration::from_secs(5));
        assert_eq!(per_call_timeout(30), Duration::from_secs(15));
    }
}
