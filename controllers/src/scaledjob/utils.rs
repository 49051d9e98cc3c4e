use anyhow::{anyhow, Error, Result};
use reqwest::Url;
use resources::{
    informer::{ListerWatcher, WsStream},
    models::Response,
    objects::{job::Job, Object},
};
use tokio_tungstenite::connect_async;

use crate::CONFIG;

pub fn create_lister_watcher<T: Object>() -> ListerWatcher<T> {
    let list_url = format!("{}/api/v1/{}", CONFIG.api_server_url, T::kind());
    let watch_url = format!("{}/api/v1/watch/{}", CONFIG.api_server_watch_url, T::kind());
    ListerWatcher {
        lister: Box::new(move |_| {
            let list_url = list_url.clone();
            Box::pin(async {
                let res = reqwest::get(list_url)
                    .await?
                    .json::<Response<Vec<T>>>()
                    .await?;
                let res = res.data.ok_or_else(|| anyhow!("lister failed"))?;
                Ok::<Vec<T>, Error>(res)
            })
        }),
        watcher: Box::new(move |_| {
            let watch_url = watch_url.clone();
            Box::pin(async move {
                let url = Url::parse(watch_url.as_str())?;
                let (stream, _) = connect_async(url).await?;
                Ok::<WsStream, Error>(stream)
            })
        }),
    }
}

pub async fn post_status<T: Object>(object: &T) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .put(format!("{}{}/status", CONFIG.api_server_url, object.uri()))
        .json(object)
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}

pub async fn create_job(job: &Job) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/v1/{}", CONFIG.api_server_url, Job::kind()))
        .json(job)
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}

pub async fn delete_job(job: &Job) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .delete(format!("{}{}", CONFIG.api_server_url, job.uri()))
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}
