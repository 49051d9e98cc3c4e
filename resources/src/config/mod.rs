use serde::{Deserialize, Serialize};

/// Cluster-wide settings shared by every binary in the core: where the API
/// server lives, and the defaults applied to a `ScaledObject`/`ScaledJob`
/// when its own spec leaves a field unset.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// API server URL, used for REST reads/writes.
    pub api_server_url: String,
    /// API server watch URL, used to open the websocket watch stream.
    pub api_server_watch_url: String,
    /// Default `pollingInterval` (seconds) when a scalable object omits it.
    pub default_polling_interval_seconds: u64,
    /// Default `cooldownPeriod` (seconds) when a scalable object omits it.
    pub default_cooldown_period_seconds: u64,
    /// How long the cache waits for a scaler's `Close()` before giving up
    /// and dropping the reference anyway.
    pub scaler_close_timeout_seconds: u64,
    /// How long `DeleteScalableObject` waits for a ScaleLoop task to drain
    /// after its cancellation token fires.
    pub scale_loop_stop_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            api_server_url: "http://localhost:8080".to_string(),
            api_server_watch_url: "ws://localhost:8080".to_string(),
            default_polling_interval_seconds: 30,
            default_cooldown_period_seconds: 300,
            scaler_close_timeout_seconds: 10,
            scale_loop_stop_timeout_seconds: 60,
        }
    }
}

/// Extra settings for the metrics adapter binary, layered on top of
/// [`ClusterConfig`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterConfig {
    pub listen_address: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            listen_address: "0.0.0.0:8081".to_string(),
        }
    }
}
