use serde::{Deserialize, Serialize};

use crate::{config::ClusterConfig, models::Response, objects::object_reference::ObjectReference};

#[derive(Debug)]
pub enum TargetResolveError {
    NotFound { kind: String, name: String },
    DiscoveryFailed(anyhow::Error),
    /// The `/scale` write lost a race against another writer (HTTP 409).
    /// Retriable: the caller should requeue and re-read current replicas.
    Conflict { kind: String, name: String },
}

impl std::fmt::Display for TargetResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetResolveError::NotFound { kind, name } => {
                write!(f, "scale target {}/{} not found", kind, name)
            },
            TargetResolveError::DiscoveryFailed(e) => write!(f, "discovery failed: {}", e),
            TargetResolveError::Conflict { kind, name } => {
                write!(f, "scale target {}/{} write conflicted, retry", kind, name)
            },
        }
    }
}

impl std::error::Error for TargetResolveError {}

/// The `/scale` subresource every scale target exposes, regardless of its
/// underlying kind.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSubresource {
    pub current_replicas: u32,
    pub selector: String,
}

/// Resolves a `scaleTargetRef`/`jobTargetRef` to its live `/scale`
/// subresource and writes replica changes back through the same path.
/// Generalizes `podautoscaler/utils.rs`'s hardcoded `ReplicaSet`-only
/// lookup to an arbitrary `{kind}/{name}` target.
pub struct TargetResolver {
    client: reqwest::Client,
    api_server_url: String,
}

impl TargetResolver {
    pub fn new(config: &ClusterConfig) -> Self {
        TargetResolver {
            client: reqwest::Client::new(),
            api_server_url: config.api_server_url.clone(),
        }
    }

    pub async fn get_scale(&self, target: &ObjectReference) -> Result<ScaleSubresource, TargetResolveError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/{}/{}/scale",
            self.api_server_url,
            target.namespace_or("default"),
            target.kind.to_lowercase(),
            target.name,
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TargetResolveError::DiscoveryFailed(e.into()))?
            .json::<Response<ScaleSubresource>>()
            .await
            .map_err(|e| TargetResolveError::DiscoveryFailed(e.into()))?;
        response.data.ok_or_else(|| TargetResolveError::NotFound {
            kind: target.kind.clone(),
            name: target.name.clone(),
        })
    }

    pub async fn set_replicas(&self, target: &ObjectReference, replicas: u32) -> Result<(), TargetResolveError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/{}/{}/scale",
            self.api_server_url,
            target.namespace_or("default"),
            target.kind.to_lowercase(),
            target.name,
        );
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "replicas": replicas }))
            .send()
            .await
            .map_err(|e| TargetResolveError::DiscoveryFailed(e.into()))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(TargetResolveError::Conflict { kind: target.kind.clone(), name: target.name.clone() });
        }

        let response = response
            .json::<Response<()>>()
            .await
            .map_err(|e| TargetResolveError::DiscoveryFailed(e.into()))?;
        if let Some(msg) = response.msg {
            tracing::debug!("{}", msg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_renders_kind_and_name() {
        let err = TargetResolveError::NotFound { kind: "Deployment".to_string(), name: "orders".to_string() };
        assert_eq!(err.to_string(), "scale target Deployment/orders not found");
    }

    #[test]
    fn namespace_defaults_when_unset() {
        let target = ObjectReference::new("Deployment", "orders");
        assert_eq!(target.namespace_or("default"), "default");
    }
}
