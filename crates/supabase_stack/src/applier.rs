//! The boundary to the cluster: idempotent upserts, deletes and readiness reads.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;

use crate::resources::ResourceSpec;
use crate::secrets::SecretData;
use crate::util::errors::ApplyError;

pub mod cluster;

pub use cluster::KubeApplier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Identity of an applied object plus what the apply did to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub outcome: ApplyOutcome,
}

impl ResourceHandle {
    pub fn new(spec: &ResourceSpec, outcome: ApplyOutcome) -> Self {
        ResourceHandle {
            kind: spec.kind(),
            name: spec.name().to_string(),
            namespace: spec.namespace().map(str::to_string),
            outcome,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Observed readiness of an applied object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConditionSet {
    pub ready: bool,
    pub replicas: i32,
    pub ready_replicas: i32,
    /// The controller has not yet rolled out the latest spec.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rollout_pending: bool,
    pub conditions: Vec<Condition>,
}

impl ConditionSet {
    /// Objects without a rollout are ready once they exist.
    pub fn present() -> Self {
        ConditionSet {
            ready: true,
            ..Default::default()
        }
    }

    pub fn missing() -> Self {
        ConditionSet {
            conditions: vec![Condition {
                type_: "Exists".to_string(),
                status: "False".to_string(),
                reason: Some("NotFound".to_string()),
                message: None,
            }],
            ..Default::default()
        }
    }

    /// Ready only once the controller observed the current generation and
    /// every desired replica runs the new template and is ready.
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let Some(status) = deployment.status.as_ref() else {
            return ConditionSet {
                replicas: desired,
                rollout_pending: true,
                ..Default::default()
            };
        };
        let generation = deployment.metadata.generation.unwrap_or(0);
        let observed = status.observed_generation.unwrap_or(0);
        let replicas = status.replicas.unwrap_or(0);
        let ready_replicas = status.ready_replicas.unwrap_or(0);
        let updated_replicas = status.updated_replicas.unwrap_or(0);
        let conditions = status
            .conditions
            .iter()
            .flatten()
            .map(|c| Condition {
                type_: c.type_.clone(),
                status: c.status.clone(),
                reason: c.reason.clone(),
                message: c.message.clone(),
            })
            .collect();

        let rollout_pending = observed < generation || updated_replicas < desired;
        ConditionSet {
            ready: !rollout_pending
                && replicas > 0
                && ready_replicas == replicas
                && ready_replicas >= desired,
            replicas,
            ready_replicas,
            rollout_pending,
            conditions,
        }
    }

    /// One-line description for results and logs.
    pub fn summary(&self) -> String {
        let mut summary = format!("{}/{} replicas ready", self.ready_replicas, self.replicas);
        if self.rollout_pending {
            summary.push_str("; rollout pending");
        }
        for condition in &self.conditions {
            summary.push_str(&format!("; {}={}", condition.type_, condition.status));
            if let Some(reason) = &condition.reason {
                summary.push_str(&format!(" ({reason})"));
            }
        }
        summary
    }
}

#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Create the object, or bring it in line with `spec` when it drifted.
    async fn apply(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ApplyError>;

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome, ApplyError>;

    async fn status(&self, handle: &ResourceHandle) -> Result<ConditionSet, ApplyError>;

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, ApplyError>;
}
