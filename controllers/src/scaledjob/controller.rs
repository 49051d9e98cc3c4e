use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use futures_delay_queue::{delay_queue, DelayQueue};
use futures_intrusive::{buffer::GrowingHeapBuf, channel::shared::GenericReceiver};
use parking_lot::RawMutex;
use resources::{
    informer::{EventHandler, Informer, ResyncHandler, Store},
    objects::{
        conditions::{ConditionStatus, ConditionType},
        job::{Job, JobPhase, JobSpec},
        object_reference::ObjectReference,
        scaled_job::{RolloutStrategy, ScaledJob},
        Labels, Metadata, Object,
    },
    scaling::scaler::ScalerRegistry,
};
use tokio::sync::mpsc::{self, Receiver};
use uuid::Uuid;

use crate::{scale_handler::ScaleHandler, utils, CONFIG};

#[derive(Debug)]
enum Event {
    Add(ScaledJob),
    Update(ScaledJob, ScaledJob),
    Delete(ScaledJob),
}

#[derive(Debug)]
struct ResyncNotification;

fn cache_key(job: &ScaledJob) -> String {
    format!("{}/{}", job.metadata.namespace, job.metadata.name)
}

pub struct ScaledJobController {
    rx: Receiver<Event>,
    resync_rx: Receiver<ResyncNotification>,
    scaledjob_informer_handle: Option<tokio::task::JoinHandle<Result<()>>>,
    job_informer_handle: Option<tokio::task::JoinHandle<Result<()>>>,
    store: Store<ScaledJob>,
    job_store: Store<Job>,
    handler: Arc<ScaleHandler>,

    work_queue: DelayQueue<String, GrowingHeapBuf<String>>,
    work_queue_rx: GenericReceiver<RawMutex, String, GrowingHeapBuf<String>>,
    in_queue: HashSet<String>,
}

impl ScaledJobController {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Event>(16);
        let (resync_tx, resync_rx) = mpsc::channel::<ResyncNotification>(16);

        let lw = utils::create_lister_watcher::<ScaledJob>();
        let tx_add = tx;
        let tx_update = tx_add.clone();
        let tx_delete = tx_add.clone();
        let eh = EventHandler::<ScaledJob> {
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

        let scaledjob_informer = Informer::new(lw, eh, rh);
        let store = scaledjob_informer.get_store();
        let scaledjob_informer_handle = tokio::spawn(async move { scaledjob_informer.run().await });

        let job_lw = utils::create_lister_watcher::<Job>();
        let job_eh = EventHandler::<Job> {
            add_cls: Box::new(|_| Box::pin(async { Ok(()) })),
            update_cls: Box::new(|_| Box::pin(async { Ok(()) })),
            delete_cls: Box::new(|_| Box::pin(async { Ok(()) })),
        };
        let job_rh = ResyncHandler(Box::new(|()| Box::pin(async { Ok(()) })));
        let job_informer = Informer::new(job_lw, job_eh, job_rh);
        let job_store = job_informer.get_store();
        let job_informer_handle = tokio::spawn(async move { job_informer.run().await });

        let (work_queue, work_queue_rx) = delay_queue::<String>();

        ScaledJobController {
            rx,
            resync_rx,
            scaledjob_informer_handle: Some(scaledjob_informer_handle),
            job_informer_handle: Some(job_informer_handle),
            store,
            job_store,
            handler: Arc::new(ScaleHandler::new(
                ScalerRegistry::with_builtin_scalers(),
                std::time::Duration::from_secs(CONFIG.scaler_close_timeout_seconds),
            )),
            work_queue,
            work_queue_rx,
            in_queue: HashSet::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("ScaledJob controller started");

        loop {
            tokio::select! {
                Some(event) = self.rx.recv() => {
                    match event {
                        Event::Add(job) | Event::Update(_, job) => self.enqueue(&job),
                        Event::Delete(job) => {
                            self.handler.delete(&job).await;
                            tracing::info!("ScaledJob {} deleted, scale loop stopped", cache_key(&job));
                        },
                    }
                },
                Some(_) = self.resync_rx.recv() => self.handle_resync().await,
                Some(key) = self.work_queue_rx.receive() => {
                    self.in_queue.remove(&key);
                    let store = self.store.read().await;
                    let object = store.get(&key).cloned();
                    drop(store);
                    if let Some(object) = object {
                        let polling_interval = object.spec.polling_interval;
                        match self.reconcile(object).await {
                            Ok(_) => tracing::debug!("reconciled ScaledJob {}", key),
                            Err(e) => tracing::error!("error reconciling {}: {:#}", key, e),
                        }
                        self.enqueue_after(key, std::time::Duration::from_secs(polling_interval));
                    }
                },
                else => break,
            }
        }

        if let Some(handle) = self.scaledjob_informer_handle.take() {
            handle.await??;
        }
        if let Some(handle) = self.job_informer_handle.take() {
            handle.await??;
        }
        Ok(())
    }

    fn enqueue(&mut self, job: &ScaledJob) {
        let key = cache_key(job);
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

    fn owned_jobs(&self, job: &ScaledJob, jobs: &std::collections::HashMap<String, Job>) -> Vec<Job> {
        let selector = Labels(job.owned_job_labels());
        jobs.values()
            .filter(|j| selector.matches(&j.metadata.labels))
            .cloned()
            .collect()
    }

    async fn reconcile(&self, mut job: ScaledJob) -> Result<()> {
        if let Err(reason) = job.validate() {
            job.status.conditions.set(ConditionType::Ready, ConditionStatus::False, "Invalid", reason);
            utils::post_status(&job).await?;
            return Ok(());
        }

        if job.is_paused() {
            self.handler.delete(&job).await;
            job.status.conditions.set(ConditionType::Paused, ConditionStatus::True, "Paused", "");
            utils::post_status(&job).await?;
            return Ok(());
        }
        job.status.conditions.set(ConditionType::Paused, ConditionStatus::False, "Unpaused", "");

        let jobs_snapshot = self.job_store.read().await.clone();

        if job.spec.rollout_strategy == RolloutStrategy::Immediate {
            let (name_key, name_val) = job.owned_job_label();
            let stale: Vec<Job> = jobs_snapshot
                .values()
                .filter(|j| j.metadata.labels.0.get(&name_key) == Some(&name_val))
                .filter(|j| {
                    j.metadata.labels.0.get("scaledjob.keda.sh/generation")
                        != Some(&job.metadata.generation.to_string())
                })
                .cloned()
                .collect();
            for stale_job in &stale {
                utils::delete_job(stale_job).await?;
            }
        }

        let owned = self.owned_jobs(&job, &jobs_snapshot);
        let running_count = owned.iter().filter(|j| j.status.phase == Some(JobPhase::Running)).count() as u32;
        let pending_count = owned.iter().filter(|j| j.is_active()).count() as u32 - running_count;

        let outcome = self.handler.tick(&job, running_count, pending_count).await?;

        for _ in 0..outcome.desired_new_jobs {
            let new_job = Job {
                metadata: Metadata {
                    name: format!("{}-{}", job.metadata.name, Uuid::new_v4()),
                    namespace: job.metadata.namespace.clone(),
                    labels: Labels(job.owned_job_labels()),
                    owner_references: vec![ObjectReference {
                        kind: "ScaledJob".to_string(),
                        name: job.metadata.name.clone(),
                        namespace: job.metadata.namespace.clone(),
                        api_version: "keda.sh/v1alpha1".to_string(),
                    }],
                    ..Default::default()
                },
                spec: JobSpec {
                    template: job.spec.job_target_ref.template.clone(),
                    back_off_limit: job.spec.job_target_ref.back_off_limit,
                },
                status: Default::default(),
            };
            utils::create_job(&new_job).await?;
        }

        job.status.conditions.set(
            ConditionType::Active,
            if outcome.is_active { ConditionStatus::True } else { ConditionStatus::False },
            "TriggersEvaluated",
            "",
        );
        job.status.conditions.set(ConditionType::Ready, ConditionStatus::True, "Reconciled", "");
        if outcome.is_active {
            job.status.last_active_time = Some(chrono::Local::now().naive_local());
        }
        job.status.observed_generation = job.metadata.generation;

        utils::post_status(&job).await
    }
}

impl Default for ScaledJobController {
    fn default() -> Self {
        Self::new()
    }
}
