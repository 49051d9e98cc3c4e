use std::{collections::HashMap, convert::TryFrom, fmt};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub mod conditions;
pub mod horizontal_pod_autoscaler;
pub mod job;
pub mod metrics;
pub mod object_reference;
pub mod scaled_job;
pub mod scaled_object;
pub mod trigger;

/// A label set, as attached to every object's metadata and used to build
/// HPA/external-metrics selectors (`scaledobject.keda.sh/name=...`).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Labels(pub HashMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Labels(HashMap::new())
    }

    /// True if every key/value pair in `self` is present in `other`, i.e.
    /// `self` is a selector that `other`'s labels satisfy.
    pub fn matches(&self, other: &Labels) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();
        write!(f, "{}", pairs.join(","))
    }
}

impl TryFrom<&str> for Labels {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut map = HashMap::new();
        if value.is_empty() {
            return Ok(Labels(map));
        }
        for pair in value.split(',') {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid label selector segment: {}", pair))?;
            map.insert(k.to_string(), v.to_string());
        }
        Ok(Labels(map))
    }
}

/// Metadata common to every object the core reads or writes. `generation`
/// is what the scalers cache keys rebuilds on; `resource_version` lets a
/// status write detect it raced another writer and retry against a fresh
/// read.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub uid: Option<Uuid>,
    pub labels: Labels,
    /// Unlike `labels`, never used for selector matching -- just free-form
    /// key/value pairs an object's owner can set, e.g.
    /// `autoscaling.keda.sh/paused` / `autoscaling.keda.sh/paused-replicas`.
    pub annotations: HashMap<String, String>,
    pub owner_references: Vec<object_reference::ObjectReference>,
    pub generation: u64,
    pub resource_version: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            name: String::new(),
            namespace: "default".to_string(),
            uid: None,
            labels: Labels::new(),
            annotations: HashMap::new(),
            owner_references: Vec::new(),
            generation: 0,
            resource_version: None,
        }
    }
}

/// The contract the informer/reflector pair needs from any watched type:
/// enough to build store keys and REST paths without knowing the concrete
/// resource kind.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Plural REST path segment, e.g. "scaledobjects".
    fn kind() -> &'static str;
    fn metadata(&self) -> &Metadata;

    /// Store key / REST path suffix: `{namespace}/{name}`.
    fn key(&self) -> String {
        format!("{}/{}", self.metadata().namespace, self.metadata().name)
    }

    fn uri(&self) -> String {
        format!("/api/v1/{}/{}", Self::kind(), self.key())
    }
}

impl Object for scaled_object::ScaledObject {
    fn kind() -> &'static str {
        "scaledobjects"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Object for scaled_job::ScaledJob {
    fn kind() -> &'static str {
        "scaledjobs"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Object for horizontal_pod_autoscaler::HorizontalPodAutoscaler {
    fn kind() -> &'static str {
        "horizontalpodautoscalers"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_roundtrip_through_selector_string() {
        let labels = Labels::try_from("app=orders,tier=worker").unwrap();
        assert_eq!(labels.0.get("app").map(String::as_str), Some("orders"));
        let rendered = labels.to_string();
        assert!(rendered.contains("app=orders"));
        assert!(rendered.contains("tier=worker"));
    }

    #[test]
    fn labels_matches_is_a_subset_test() {
        let selector = Labels::try_from("app=orders").unwrap();
        let mut full = HashMap::new();
        full.insert("app".to_string(), "orders".to_string());
        full.insert("tier".to_string(), "worker".to_string());
        assert!(selector.matches(&Labels(full)));
    }
}
