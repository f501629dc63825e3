//! Applies a [`ResourceGraph`] tier by tier, gating each tier on readiness.

use std::collections::BTreeMap;

use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use crate::applier::{ApplyOutcome, ResourceApplier, ResourceHandle};
use crate::resources::{ResourceGraph, ResourceSpec, ServiceResources};
use crate::stack::ServiceName;
use crate::util::errors::ApplyError;
use crate::util::metrics::Metrics;

pub mod health;
pub mod tiers;

pub use health::{HealthGate, HealthOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedResource {
    pub kind: &'static str,
    pub name: String,
    pub outcome: ApplyOutcome,
}

impl From<&ResourceHandle> for AppliedResource {
    fn from(handle: &ResourceHandle) -> Self {
        AppliedResource {
            kind: handle.kind,
            name: handle.name.clone(),
            outcome: handle.outcome,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    Apply {
        kind: &'static str,
        name: String,
        message: String,
    },
    HealthTimeout {
        last_condition: String,
    },
}

impl FailureReason {
    fn metric_label(&self) -> &'static str {
        match self {
            FailureReason::Apply { .. } => "apply_error",
            FailureReason::HealthTimeout { .. } => "health_timeout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ServiceStatus {
    Applied {
        resources: Vec<AppliedResource>,
    },
    Skipped {
        /// The failed service or shared resource this one waited on.
        blocked_by: String,
    },
    Failed {
        #[serde(flatten)]
        reason: FailureReason,
        resources: Vec<AppliedResource>,
    },
    Cancelled,
}

impl ServiceStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, ServiceStatus::Applied { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub shared: Vec<AppliedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_failure: Option<String>,
    pub services: BTreeMap<ServiceName, ServiceStatus>,
}

impl ScheduleReport {
    pub fn success(&self) -> bool {
        self.shared_failure.is_none() && self.services.values().all(ServiceStatus::is_applied)
    }
}

/// What failed, plus what was applied before it.
type SubmitFailure = (FailureReason, Vec<AppliedResource>);

struct Submitted {
    resources: Vec<AppliedResource>,
    deployment: Option<ResourceHandle>,
}

pub struct Scheduler<'a> {
    applier: &'a dyn ResourceApplier,
    metrics: &'a Metrics,
    cancel: watch::Receiver<bool>,
    apply_timeout: Duration,
    health_timeout: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        applier: &'a dyn ResourceApplier,
        metrics: &'a Metrics,
        cancel: watch::Receiver<bool>,
        apply_timeout: Duration,
        health_timeout: Duration,
    ) -> Self {
        Scheduler {
            applier,
            metrics,
            cancel,
            apply_timeout,
            health_timeout,
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn apply_one(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ApplyError> {
        match timeout(self.apply_timeout, self.applier.apply(spec)).await {
            Ok(result) => result,
            Err(_) => Err(ApplyError::Timeout {
                kind: spec.kind(),
                name: spec.name().to_string(),
                timeout: self.apply_timeout,
            }),
        }
    }

    /// Apply a service's resources in order, stopping at the first error.
    async fn submit(&self, service: &ServiceResources) -> Result<Submitted, SubmitFailure> {
        let mut submitted = Submitted {
            resources: vec![],
            deployment: None,
        };
        for spec in &service.resources {
            match self.apply_one(spec).await {
                Ok(handle) => {
                    submitted.resources.push(AppliedResource::from(&handle));
                    if matches!(spec, ResourceSpec::Deployment(_)) {
                        submitted.deployment = Some(handle);
                    }
                }
                Err(e) => {
                    error!(service = %service.name, error = %e, "Failed to apply resource");
                    let reason = FailureReason::Apply {
                        kind: spec.kind(),
                        name: spec.name().to_string(),
                        message: e.to_string(),
                    };
                    return Err((reason, submitted.resources));
                }
            }
        }
        Ok(submitted)
    }

    async fn gate(&self, service: &ServiceResources, submitted: Submitted) -> ServiceStatus {
        let Some(handle) = submitted.deployment.as_ref() else {
            return ServiceStatus::Applied {
                resources: submitted.resources,
            };
        };
        let gate = HealthGate::new(self.applier, self.cancel.clone());
        match gate
            .await_ready(service.name, handle, &service.health_check, self.health_timeout)
            .await
        {
            HealthOutcome::Ready => ServiceStatus::Applied {
                resources: submitted.resources,
            },
            HealthOutcome::TimedOut { last_condition } => {
                warn!(service = %service.name, last_condition, "Service did not become ready");
                ServiceStatus::Failed {
                    reason: FailureReason::HealthTimeout { last_condition },
                    resources: submitted.resources,
                }
            }
            HealthOutcome::Cancelled => ServiceStatus::Cancelled,
        }
    }

    pub async fn apply(&self, graph: &ResourceGraph) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for spec in &graph.shared {
            if self.cancelled() {
                for name in graph.services.keys() {
                    report.services.insert(*name, ServiceStatus::Cancelled);
                }
                return report;
            }
            match self.apply_one(spec).await {
                Ok(handle) => report.shared.push(AppliedResource::from(&handle)),
                Err(e) => {
                    error!(error = %e, "Failed to apply shared resource");
                    let blocked_by = format!("{}/{}", spec.kind(), spec.name());
                    for name in graph.services.keys() {
                        report.services.insert(
                            *name,
                            ServiceStatus::Skipped {
                                blocked_by: blocked_by.clone(),
                            },
                        );
                    }
                    report.shared_failure = Some(e.to_string());
                    return report;
                }
            }
        }

        let dependencies = graph.dependencies();
        for (index, tier) in graph.tiers.iter().enumerate() {
            if self.cancelled() {
                info!(tier = index, "Deployment cancelled");
                break;
            }
            let runnable: Vec<&ServiceResources> = tier
                .iter()
                .filter(|name| !report.services.contains_key(*name))
                .filter_map(|name| graph.service(*name))
                .collect();
            if runnable.is_empty() {
                continue;
            }

            let _timer = self.metrics.measure_tier(index);
            let names: Vec<ServiceName> = runnable.iter().map(|s| s.name).collect();
            info!(tier = index, services = ?names, "Applying tier");

            let width = runnable.len();
            let outcomes: Vec<(ServiceName, ServiceStatus)> = stream::iter(runnable)
                .map(|service| async move {
                    let status = match self.submit(service).await {
                        Ok(submitted) => self.gate(service, submitted).await,
                        Err((reason, resources)) => ServiceStatus::Failed { reason, resources },
                    };
                    (service.name, status)
                })
                .buffer_unordered(width)
                .collect()
                .await;

            for (name, status) in outcomes {
                if let ServiceStatus::Failed { reason, .. } = &status {
                    self.metrics.service_failure(name, reason.metric_label());
                    for dependent in tiers::dependents_of(&dependencies, name) {
                        report
                            .services
                            .entry(dependent)
                            .or_insert_with(|| ServiceStatus::Skipped {
                                blocked_by: name.to_string(),
                            });
                    }
                }
                report.services.insert(name, status);
            }
        }

        for name in graph.services.keys() {
            report.services.entry(*name).or_insert(ServiceStatus::Cancelled);
        }
        report
    }
}
