use serde::{Deserialize, Serialize};
use strum::Display;

use crate::objects::Metadata;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// The workload a `ScaledJob` stamps out per unit of work. Only carries
/// enough shape for the reconciler to count active/succeeded/failed
/// instances and garbage-collect by owner reference -- the actual
/// container spec is opaque, copied verbatim from `JobTargetRef.template`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSpec {
    pub template: serde_json::Value,
    pub back_off_limit: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStatus {
    pub phase: Option<JobPhase>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Job {
    pub metadata: Metadata,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    pub fn is_active(&self) -> bool {
        matches!(self.status.phase, None | Some(JobPhase::Pending) | Some(JobPhase::Running))
    }
}

impl super::Object for Job {
    fn kind() -> &'static str {
        "jobs"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
