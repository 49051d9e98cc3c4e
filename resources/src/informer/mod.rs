use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use reflector::{Reflector, ReflectorNotification};
use tokio::{
    net::TcpStream,
    sync::{mpsc, RwLock},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::objects::Object;

mod reflector;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The in-memory mirror of a resource collection, keyed by `{namespace}/{name}`.
/// A `tokio::sync::RwLock` rather than `DashMap` because readers need to
/// observe a whole consistent snapshot across the `get` calls a reconcile
/// tick makes, not just per-key atomicity.
pub type Store<T> = Arc<RwLock<HashMap<String, T>>>;

pub type CLS<ARG, RES> = Box<dyn Fn(ARG) -> BoxFuture<'static, Result<RES>> + Send + Sync>;

pub struct ListerWatcher<T> {
    pub lister: CLS<(), Vec<T>>,
    pub watcher: CLS<(), WsStream>,
}

pub struct EventHandler<T> {
    pub add_cls: CLS<T, ()>,
    pub update_cls: CLS<(T, T), ()>,
    pub delete_cls: CLS<T, ()>,
}

pub struct ResyncHandler(pub CLS<(), ()>);

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Lists then watches one resource collection, feeding an [`EventHandler`]
/// and periodically firing a [`ResyncHandler`] so callers can re-derive
/// state even when no individual watch event arrived (e.g. a
/// `pollingInterval` tick that should re-examine every object, not just
/// changed ones).
pub struct Informer<T: Object> {
    reflector: Arc<Reflector<T>>,
    eh: EventHandler<T>,
    rh: ResyncHandler,
    store: Store<T>,
}

impl<T: Object> Informer<T> {
    pub fn new(lw: ListerWatcher<T>, eh: EventHandler<T>, rh: ResyncHandler) -> Self {
        let store: Store<T> = Arc::new(RwLock::new(HashMap::new()));
        let reflector = Reflector { lw, store: store.clone() };
        Self {
            reflector: Arc::new(reflector),
            eh,
            rh,
            store,
        }
    }

    pub fn get_store(&self) -> Store<T> {
        self.store.clone()
    }

    pub async fn run(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<ReflectorNotification<T>>(16);
        let reflector = self.reflector.clone();
        let reflector_handle = tokio::spawn(async move {
            loop {
                if let Err(e) = reflector.run(tx.clone()).await {
                    tracing::warn!("informer watch disconnected, reconnecting: {:#}", e);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
                return Ok::<(), anyhow::Error>(());
            }
        });

        let rh = self.rh;
        let resync_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(RESYNC_PERIOD);
            interval.tick().await; // first tick fires immediately, skip it
            loop {
                interval.tick().await;
                if let Err(e) = (rh.0)(()).await {
                    tracing::error!("resync handler failed: {:#}", e);
                }
            }
        });

        tracing::info!("informer for {} started", T::kind());

        while let Some(n) = rx.recv().await {
            match n {
                ReflectorNotification::Add(new) => {
                    (self.eh.add_cls)(new).await.with_context(|| "add handler error")?;
                },
                ReflectorNotification::Update(old, new) => {
                    (self.eh.update_cls)((old, new)).await.with_context(|| "update handler error")?;
                },
                ReflectorNotification::Delete(old) => {
                    (self.eh.delete_cls)(old).await.with_context(|| "delete handler error")?;
                },
            }
        }

        resync_handle.abort();
        reflector_handle.await?
    }
}
