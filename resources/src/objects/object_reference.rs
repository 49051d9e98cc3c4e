use serde::{Deserialize, Serialize};

/// A reference to another Kubernetes object, either a `scaleTargetRef` /
/// `jobTargetRef` pointed at by a scalable object, or an owner reference
/// recorded in a child's metadata.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectReference {
    /// Kind of the referent, e.g. "Deployment", "ScaledObject".
    pub kind: String,
    /// Name of the referent.
    pub name: String,
    /// Namespace of the referent. Empty means "same namespace as the
    /// object holding this reference".
    pub namespace: String,
    /// API group/version of the referent, e.g. "apps/v1". Empty defaults
    /// to the core group.
    pub api_version: String,
}

impl Default for ObjectReference {
    fn default() -> Self {
        ObjectReference {
            kind: String::new(),
            name: String::new(),
            namespace: String::new(),
            api_version: String::new(),
        }
    }
}

impl ObjectReference {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectReference {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            default_namespace
        } else {
            &self.namespace
        }
    }
}
