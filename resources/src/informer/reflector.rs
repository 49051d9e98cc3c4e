use anyhow::{anyhow, Result};
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{ListerWatcher, Store};
use crate::{models::etcd::WatchEvent, objects::Object};

pub(super) struct Reflector<T: Object> {
    pub(super) lw: ListerWatcher<T>,
    pub(super) store: Store<T>,
}

#[derive(Debug)]
pub(super) enum ReflectorNotification<T> {
    Add(T),
    /// old value, new value
    Update(T, T),
    Delete(T),
}

impl<T: Object> Reflector<T> {
    /// Pulls the initial list into the store, then streams watch events
    /// until the connection drops. Returning an error here is the signal
    /// for the informer to reconnect -- this function never retries on
    /// its own.
    pub(super) async fn run(&self, tx: mpsc::Sender<ReflectorNotification<T>>) -> Result<()> {
        let initial = (self.lw.lister)(()).await?;
        {
            let mut store = self.store.write().await;
            store.clear();
            for item in initial {
                store.insert(item.key(), item);
            }
        }

        let (_, mut receiver) = (self.lw.watcher)(()).await?.split();

        loop {
            let msg: Message = receiver
                .next()
                .await
                .ok_or_else(|| anyhow!("watch stream closed by api-server"))??;

            if msg.is_close() {
                return Err(anyhow!("api-server watch disconnect"));
            }

            let Message::Text(text) = msg else {
                tracing::warn!("received non-text watch frame from api-server, ignoring");
                continue;
            };

            let event: WatchEvent = serde_json::from_str(&text)?;
            match event {
                WatchEvent::Put(e) => {
                    let new: T = serde_json::from_str(&e.object)?;
                    let mut store = self.store.write().await;
                    let old = store.insert(e.key.clone(), new.clone());
                    drop(store);
                    match old {
                        Some(old) => tx.send(ReflectorNotification::Update(old, new)).await?,
                        None => tx.send(ReflectorNotification::Add(new)).await?,
                    }
                },
                WatchEvent::Delete(e) => {
                    let mut store = self.store.write().await;
                    let old = store.remove(&e.key);
                    drop(store);
                    match old {
                        Some(old) => tx.send(ReflectorNotification::Delete(old)).await?,
                        None => tracing::warn!("watch inconsistent: key {} already gone", e.key),
                    }
                },
            }
        }
    }
}
