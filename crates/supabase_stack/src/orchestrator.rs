//! Entry points: deploy, destroy and render a stack.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::applier::{DeleteOutcome, ResourceApplier};
use crate::config::{self, DeploymentConfig, Environment, PartialConfig};
use crate::hardware::{HardwareFacts, HardwareFactsProvider};
use crate::resources::{self, ResourceGraph, ResourceSpec};
use crate::scheduler::{AppliedResource, FailureReason, ScheduleReport, Scheduler, ServiceStatus};
use crate::secrets::{self, SecretWarning, SECRET_NAME};
use crate::stack::ServiceName;
use crate::util::errors::Result;
use crate::util::metrics::Metrics;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthFailure {
    pub service: ServiceName,
    pub last_condition: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeploymentResult {
    pub namespace: String,
    pub success: bool,
    pub services: BTreeMap<ServiceName, ServiceStatus>,
    pub shared: Vec<AppliedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_failure: Option<String>,
    pub health_failures: Vec<HealthFailure>,
    pub warnings: Vec<SecretWarning>,
    pub hardware: Option<HardwareFacts>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentResult {
    fn new(
        config: &DeploymentConfig,
        report: ScheduleReport,
        warnings: Vec<SecretWarning>,
        hardware: Option<HardwareFacts>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let health_failures = report
            .services
            .iter()
            .filter_map(|(service, status)| match status {
                ServiceStatus::Failed {
                    reason: FailureReason::HealthTimeout { last_condition },
                    ..
                } => Some(HealthFailure {
                    service: *service,
                    last_condition: last_condition.clone(),
                }),
                _ => None,
            })
            .collect();

        DeploymentResult {
            namespace: config.namespace.clone(),
            success: report.success(),
            services: report.services,
            shared: report.shared,
            shared_failure: report.shared_failure,
            health_failures,
            warnings,
            hardware,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn status(&self, service: ServiceName) -> Option<&ServiceStatus> {
        self.services.get(&service)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DestroyResult {
    pub namespace: String,
    pub accepted: bool,
    pub already_absent: bool,
    pub timestamp: DateTime<Utc>,
}

/// Drives one stack against one cluster.
pub struct Orchestrator {
    applier: Arc<dyn ResourceApplier>,
    hardware: Arc<dyn HardwareFactsProvider>,
    environment: Environment,
    metrics: Metrics,
    cancel: watch::Receiver<bool>,
    host: Option<String>,
}

impl Orchestrator {
    pub fn new(
        applier: Arc<dyn ResourceApplier>,
        hardware: Arc<dyn HardwareFactsProvider>,
        environment: Environment,
    ) -> Self {
        // without a sender the flag can never flip
        let (_, cancel) = watch::channel(false);
        Orchestrator {
            applier,
            hardware,
            environment,
            metrics: Metrics::default(),
            cancel,
            host: None,
        }
    }

    /// Stop starting new tiers once `true` is sent.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Size percentage targets from this node instead of the whole cluster.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn resolve(&self, overrides: PartialConfig) -> Result<DeploymentConfig> {
        Ok(config::resolve(overrides, &self.environment)?)
    }

    #[instrument(skip_all)]
    pub async fn deploy(&self, overrides: PartialConfig) -> Result<DeploymentResult> {
        let started_at = Utc::now();
        self.metrics.deployments.inc();

        let config = Arc::new(self.resolve(overrides)?);
        info!(namespace = %config.namespace, "Deploying supabase stack");

        let existing = self.applier.read_secret(&config.namespace, SECRET_NAME).await?;
        let (bundle, warnings) = secrets::synthesize(&config, existing.as_ref())?;
        let hardware = self.hardware.facts(self.host.as_deref()).await;
        if hardware.is_none() {
            warn!("No hardware facts, percentage targets use default sizing");
        }
        let graph = resources::build(&config, &bundle, hardware.as_ref())?;

        let scheduler = Scheduler::new(
            self.applier.as_ref(),
            &self.metrics,
            self.cancel.clone(),
            config.apply_timeout,
            config.health_timeout,
        );
        let report = scheduler.apply(&graph).await;

        let result = DeploymentResult::new(&config, report, warnings, hardware, started_at);
        info!(
            namespace = %result.namespace,
            success = result.success,
            "Deployment finished"
        );
        Ok(result)
    }

    /// Build the graph without touching the cluster's objects.
    #[instrument(skip_all)]
    pub async fn plan(&self, overrides: PartialConfig) -> Result<ResourceGraph> {
        let config = self.resolve(overrides)?;
        let (bundle, _) = secrets::synthesize(&config, None)?;
        let hardware = self.hardware.facts(self.host.as_deref()).await;
        Ok(resources::build(&config, &bundle, hardware.as_ref())?)
    }

    /// Multi-document YAML of everything `deploy` would apply.
    pub async fn render(&self, overrides: PartialConfig) -> Result<String> {
        Ok(self.plan(overrides).await?.render()?)
    }

    /// Delete the namespace and everything in it.
    #[instrument(skip(self))]
    pub async fn destroy(&self, namespace: &str) -> Result<DestroyResult> {
        let spec = ResourceSpec::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let outcome = self.applier.delete(&spec).await?;
        if outcome == DeleteOutcome::NotFound {
            info!(namespace, "Namespace already absent");
        }
        Ok(DestroyResult {
            namespace: namespace.to_string(),
            accepted: true,
            already_absent: outcome == DeleteOutcome::NotFound,
            timestamp: Utc::now(),
        })
    }
}
