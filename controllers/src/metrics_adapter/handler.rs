use std::{convert::TryFrom, sync::Arc};

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use axum_macros::debug_handler;
use resources::{
    models::{ErrResponse, Response},
    objects::{metrics::ExternalMetricValue, scaled_object::ScaledObject, Labels},
    scaling::cache::per_call_timeout,
};

use crate::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct MetricQuery {
    #[serde(rename = "labelSelector")]
    pub label_selector: Option<String>,
}

/// Serves GET /apis/external.metrics.k8s.io/v1beta1/namespaces/{namespace}/{metric_name}.
/// Decodes the owning ScaledObject from the `scaledobject.keda.sh/name`
/// label on the selector, builds (or reuses) its cache entry, and routes
/// `metric_name` to the scaler that owns it. Returned values are served
/// verbatim -- the HPA performs its own target-ratio math.
#[debug_handler]
pub async fn get_external_metric(
    Path((namespace, metric_name)): Path<(String, String)>,
    Query(query): Query<MetricQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Response<Vec<ExternalMetricValue>>>, ErrResponse> {
    let selector = Labels::try_from(query.label_selector.unwrap_or_default().as_str())
        .map_err(|e| ErrResponse::new("invalid labelSelector".to_string(), Some(e.to_string())))?;

    let object_name = selector.0.get("scaledobject.keda.sh/name").ok_or_else(|| {
        ErrResponse::new(
            "labelSelector must set scaledobject.keda.sh/name".to_string(),
            None,
        )
    })?;

    let store = state.scaled_object_store.read().await;
    let key = format!("{}/{}", namespace, object_name);
    let object: ScaledObject = store
        .get(&key)
        .cloned()
        .ok_or_else(|| ErrResponse::not_found(format!("ScaledObject {} not found", key), None))?;
    drop(store);

    let cache_key = format!("scaledobjects/{}", key);
    let use_cached_within = if object.is_paused() {
        // Frozen at pause-time: the scale loop stopped polling, so serve
        // whatever the cache last held rather than letting a direct query
        // resume the trigger against a paused object.
        Some(std::time::Duration::from_secs(365 * 24 * 60 * 60))
    } else {
        None
    };

    state.cache.get_or_build(&cache_key, object.metadata.generation, &object.spec.triggers).await;

    let call_timeout = per_call_timeout(object.spec.polling_interval);
    let (values, _active) = state
        .cache
        .get_metrics_and_activity_for_scaler(&cache_key, &metric_name, use_cached_within, call_timeout)
        .await
        .map_err(|e| ErrResponse::new(format!("failed to read metric {}", metric_name), Some(e.to_string())))?;

    Ok(Json(Response::new(None, Some(values))))
}

pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selector_with_scaledobject_label() {
        let selector = Labels::try_from("scaledobject.keda.sh/name=orders-worker").unwrap();
        assert_eq!(
            selector.0.get("scaledobject.keda.sh/name").map(String::as_str),
            Some("orders-worker")
        );
    }
}
