mod handler;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Extension, Router};
use lazy_static::lazy_static;
use resources::{
    config::{AdapterConfig, ClusterConfig},
    informer::{EventHandler, Informer, ResyncHandler, Store},
    objects::scaled_object::ScaledObject,
    scaling::{cache::ScalersCache, scaler::ScalerRegistry},
};

lazy_static! {
    static ref CONFIG: ClusterConfig = config::Config::builder()
        .add_source(config::File::with_name("config/metrics-adapter").required(false))
        .add_source(config::Environment::with_prefix("KEDA"))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_default();
    static ref ADAPTER_CONFIG: AdapterConfig = config::Config::builder()
        .add_source(config::File::with_name("config/metrics-adapter").required(false))
        .add_source(config::Environment::with_prefix("KEDA_ADAPTER"))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_default();
}

pub struct AppState {
    pub scaled_object_store: Store<ScaledObject>,
    pub cache: ScalersCache,
}

/// Starts the background informer that keeps `scaled_object_store` current
/// and returns the store. The provider only ever reads from it -- triggers
/// and target values come from the ScaledObject spec, never from writing
/// status back.
fn spawn_scaled_object_store() -> Store<ScaledObject> {
    let lw = utils::create_lister_watcher::<ScaledObject>();
    let eh = EventHandler::<ScaledObject> {
        add_cls: Box::new(|_| Box::pin(async { Ok(()) })),
        update_cls: Box::new(|_| Box::pin(async { Ok(()) })),
        delete_cls: Box::new(|_| Box::pin(async { Ok(()) })),
    };
    let rh = ResyncHandler(Box::new(|()| Box::pin(async { Ok(()) })));

    let informer = Informer::new(lw, eh, rh);
    let store = informer.get_store();
    tokio::spawn(async move {
        if let Err(e) = informer.run().await {
            tracing::error!("ScaledObject informer for metrics adapter stopped: {:#}", e);
        }
    });
    store
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let app_state = Arc::new(AppState {
        scaled_object_store: spawn_scaled_object_store(),
        cache: ScalersCache::new(
            ScalerRegistry::with_builtin_scalers(),
            std::time::Duration::from_secs(CONFIG.scaler_close_timeout_seconds),
        ),
    });

    let app = Router::new()
        .route(
            "/apis/external.metrics.k8s.io/v1beta1/namespaces/:namespace/:metric_name",
            get(handler::get_external_metric),
        )
        .route("/healthz", get(handler::health))
        .layer(Extension(app_state));

    tracing::info!("metrics adapter listening at {}", ADAPTER_CONFIG.listen_address);
    axum::Server::bind(&ADAPTER_CONFIG.listen_address.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}

async fn shutdown() {
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    tracing::info!("shutting down metrics adapter");
}
