use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use futures_delay_queue::{delay_queue, DelayQueue};
use futures_intrusive::{buffer::GrowingHeapBuf, channel::shared::GenericReceiver};
use parking_lot::RawMutex;
use resources::{
    informer::{EventHandler, Informer, ResyncHandler, Store},
    models::Response,
    objects::{
        conditions::{ConditionStatus, ConditionType},
        horizontal_pod_autoscaler::{ExternalMetricSource, HorizontalPodAutoscaler},
        scaled_object::ScaledObject,
        Object,
    },
    scaling::{scaler::ScalerRegistry, target_resolver::TargetResolver},
};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{scale_handler::ScaleHandler, utils, CONFIG};

#[derive(Debug)]
enum Event {
    Add(ScaledObject),
    Update(ScaledObject, ScaledObject),
    Delete(ScaledObject),
}

#[derive(Debug)]
struct ResyncNotification;

fn cache_key(object: &ScaledObject) -> String {
    format!("{}/{}", object.metadata.namespace, object.metadata.name)
}

pub struct ScaledObjectController {
    rx: Receiver<Event>,
    resync_rx: Receiver<ResyncNotification>,
    informer_handle: Option<tokio::task::JoinHandle<Result<()>>>,
    store: Store<ScaledObject>,
    handler: Arc<ScaleHandler>,

    work_queue: DelayQueue<String, GrowingHeapBuf<String>>,
    work_queue_rx: GenericReceiver<RawMutex, String, GrowingHeapBuf<String>>,
    in_queue: HashSet<String>,
}

impl ScaledObjectController {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Event>(16);
        let (resync_tx, resync_rx) = mpsc::channel::<ResyncNotification>(16);

        let lw = utils::create_lister_watcher::<ScaledObject>();
        let tx_add = tx;
        let tx_update = tx_add.clone();
        let tx_delete = tx_add.clone();
        let eh = EventHandler::<ScaledObject> {
            add_cls: Box::new(move |new| {
                let tx_add = tx_add.clone();
                Box::pin(async move {
                    tx_add.send(Event::Add(new)).await?;
                    Ok(())
                })
            }),
            update_cls: Box::new(move |(old, new)| {
                let tx_update = tx_update.clone();
                Box::pin(async move {
                    tx_update.send(Event::Update(old, new)).await?;
                    Ok(())
                })
            }),
            delete_cls: Box::new(move |old| {
                let tx_delete = tx_delete.clone();
                Box::pin(async move {
                    tx_delete.send(Event::Delete(old)).await?;
                    Ok(())
                })
            }),
        };
        let rh = ResyncHandler(Box::new(move |()| {
            let resync_tx = resync_tx.clone();
            Box::pin(async move {
                resync_tx.send(ResyncNotification).await?;
                Ok(())
            })
        }));

        let informer = Informer::new(lw, eh, rh);
        let store = informer.get_store();
        let informer_handle = tokio::spawn(async move { informer.run().await });

        let (work_queue, work_queue_rx) = delay_queue::<String>();

        ScaledObjectController {
            rx,
            resync_rx,
            informer_handle: Some(informer_handle),
            store,
            handler: Arc::new(ScaleHandler::new(
                TargetResolver::new(&CONFIG),
                ScalerRegistry::with_builtin_scalers(),
                std::time::Duration::from_secs(CONFIG.scaler_close_timeout_seconds),
            )),
            work_queue,
            work_queue_rx,
            in_queue: HashSet::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("ScaledObject controller started");

        loop {
            tokio::select! {
                Some(event) = self.rx.recv() => {
                    match event {
                        Event::Add(object) | Event::Update(_, object) => self.enqueue(&object),
                        Event::Delete(object) => {
                            self.handler.delete(&object).await;
                            tracing::info!("ScaledObject {} deleted, scale loop stopped", cache_key(&object));
                        },
                    }
                },
                Some(_) = self.resync_rx.recv() => {
                    self.handle_resync().await;
                },
                Some(key) = self.work_queue_rx.receive() => {
                    self.in_queue.remove(&key);
                    let store = self.store.read().await;
                    let object = store.get(&key).cloned();
                    drop(store);
                    if let Some(object) = object {
                        let polling_interval = object.spec.polling_interval;
                        match self.reconcile(object).await {
                            Ok(_) => tracing::debug!("reconciled ScaledObject {}", key),
                            Err(e) => tracing::error!("error reconciling {}: {:#}", key, e),
                        }
                        // Every object re-enqueues itself at its own
                        // pollingInterval so ticks continue even when no
                        // watch event arrives.
                        self.enqueue_after(key, std::time::Duration::from_secs(polling_interval));
                    }
                },
                else => break,
            }
        }

        if let Some(handle) = self.informer_handle.take() {
            handle.await??;
        }
        Ok(())
    }

    fn enqueue(&mut self, object: &ScaledObject) {
        let key = cache_key(object);
        if self.in_queue.insert(key.clone()) {
            self.work_queue.insert_at(key, std::time::Instant::now());
        }
    }

    fn enqueue_after(&mut self, key: String, delay: std::time::Duration) {
        if self.in_queue.insert(key.clone()) {
            self.work_queue.insert_at(key, std::time::Instant::now() + delay);
        }
    }

    async fn handle_resync(&mut self) {
        let store = self.store.read().await;
        let keys: Vec<String> = store.keys().cloned().collect();
        drop(store);
        for key in keys {
            if self.in_queue.insert(key.clone()) {
                self.work_queue.insert_at(key, std::time::Instant::now());
            }
        }
    }

    async fn reconcile(&self, mut object: ScaledObject) -> Result<()> {
        if let Err(reason) = object.validate() {
            object.status.conditions.set(ConditionType::Ready, ConditionStatus::False, "Invalid", reason);
            utils::post_status(&object).await?;
            return Ok(());
        }

        if object.is_paused() {
            self.handler.delete(&object).await;
            if let Some(replicas) = object.paused_replicas() {
                self.handler.set_paused_replicas(&object.spec.scale_target_ref, replicas).await?;
            }
            object.status.conditions.set(ConditionType::Paused, ConditionStatus::True, "Paused", "");
            object.status.conditions.set(ConditionType::Ready, ConditionStatus::True, "Paused", "scale loop stopped while paused");
            utils::post_status(&object).await?;
            return Ok(());
        }
        object.status.conditions.set(ConditionType::Paused, ConditionStatus::False, "Unpaused", "");

        let current_replicas = self
            .handler
            .get_scale(&object.spec.scale_target_ref)
            .await
            .with_context(|| "failed to resolve scale target")?;

        let outcome = self.handler.tick(&object, current_replicas).await?;

        object.status.conditions.set(
            ConditionType::Active,
            if outcome.is_active { ConditionStatus::True } else { ConditionStatus::False },
            "TriggersEvaluated",
            "",
        );
        object.status.conditions.set(
            ConditionType::Fallback,
            if outcome.fallback_engaged { ConditionStatus::True } else { ConditionStatus::False },
            "FailureThreshold",
            "",
        );
        object.status.conditions.set(ConditionType::Ready, ConditionStatus::True, "Reconciled", "");
        if outcome.is_active {
            object.status.last_active_time = Some(chrono::Local::now().naive_local());
        }
        object.status.observed_generation = object.metadata.generation;

        self.ensure_hpa(&object).await?;
        utils::post_status(&object).await
    }

    /// Regenerates and upserts this object's owned HPA, patching only when
    /// the generated spec actually differs from what's live.
    async fn ensure_hpa(&self, object: &ScaledObject) -> Result<()> {
        let mut metrics = Vec::with_capacity(object.spec.triggers.len());
        for (index, trigger) in object.spec.triggers.iter().enumerate() {
            let metric_name = trigger.metric_name(index);
            let target_value = self
                .handler
                .cache_target_value(object, &metric_name)
                .await
                .unwrap_or(1.0);
            metrics.push(ExternalMetricSource { metric_name, target_value, metric_type: trigger.effective_metric_type() });
        }

        let desired = HorizontalPodAutoscaler::for_scaled_object(
            &object.metadata.name,
            &object.metadata.namespace,
            object.spec.scale_target_ref.clone(),
            object.spec.min_replica_count.max(1),
            object.spec.max_replica_count,
            metrics,
        );

        let client = reqwest::Client::new();
        let existing = client
            .get(format!("{}{}", CONFIG.api_server_url, desired.uri()))
            .send()
            .await?
            .json::<Response<HorizontalPodAutoscaler>>()
            .await
            .ok()
            .and_then(|r| r.data);

        match existing {
            Some(live) if live.spec_differs(&desired.spec) => {
                client
                    .put(format!("{}{}", CONFIG.api_server_url, desired.uri()))
                    .json(&desired)
                    .send()
                    .await?;
            },
            Some(_) => {},
            None => {
                client
                    .post(format!("{}/api/v1/{}", CONFIG.api_server_url, HorizontalPodAutoscaler::kind()))
                    .json(&desired)
                    .send()
                    .await?;
            },
        }

        Ok(())
    }
}

impl Default for ScaledObjectController {
    fn default() -> Self {
        Self::new()
    }
}
