mod controller;
mod scale_handler;
mod utils;

use anyhow::Result;
use lazy_static::lazy_static;
use resources::config::ClusterConfig;

use controller::ScaledObjectController;

lazy_static! {
    static ref CONFIG: ClusterConfig = config::Config::builder()
        .add_source(config::File::with_name("config/scaledobject-controller").required(false))
        .add_source(config::Environment::with_prefix("KEDA"))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_default();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut controller = ScaledObjectController::new();
    controller.run().await
}
