use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::ObjectMeta;
use tracing::debug;

use super::{config_map, deployment, digest, labels, meta, service, sizing, storage, ResourceSpec};
use crate::config::DeploymentConfig;
use crate::hardware::HardwareFacts;
use crate::scheduler::tiers::{self, Dependencies};
use crate::secrets::{SecretBundle, SECRET_NAME};
use crate::stack::{self, HealthCheck, ServiceDefinition, ServiceName};
use crate::util::errors::GraphError;

/// Everything applied for one service, in apply order.
#[derive(Clone, Debug)]
pub struct ServiceResources {
    pub name: ServiceName,
    pub depends_on: BTreeSet<ServiceName>,
    pub health_check: HealthCheck,
    pub resources: Vec<ResourceSpec>,
}

impl ServiceResources {
    /// The Deployment whose readiness gates the service.
    pub fn deployment(&self) -> Option<&ResourceSpec> {
        self.resources
            .iter()
            .find(|r| matches!(r, ResourceSpec::Deployment(_)))
    }
}

#[derive(Clone, Debug)]
pub struct ResourceGraph {
    pub namespace: String,
    /// Namespace, then Secret.
    pub shared: Vec<ResourceSpec>,
    pub services: BTreeMap<ServiceName, ServiceResources>,
    pub tiers: Vec<Vec<ServiceName>>,
}

impl ResourceGraph {
    pub fn service(&self, name: ServiceName) -> Option<&ServiceResources> {
        self.services.get(&name)
    }

    pub fn dependencies(&self) -> Dependencies {
        self.services
            .iter()
            .map(|(name, resources)| (*name, resources.depends_on.clone()))
            .collect()
    }

    /// Every resource in apply order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.shared.iter().chain(
            self.tiers
                .iter()
                .flatten()
                .filter_map(|name| self.services.get(name))
                .flat_map(|service| service.resources.iter()),
        )
    }

    /// Multi-document YAML of the whole graph. Secret values are redacted.
    pub fn render(&self) -> Result<String, GraphError> {
        let mut out = String::new();
        for resource in self.resources() {
            let document = match resource {
                ResourceSpec::Secret(secret) => {
                    let mut redacted = secret.clone();
                    if let Some(data) = redacted.string_data.as_mut() {
                        data.values_mut().for_each(|v| *v = "<redacted>".to_string());
                    }
                    serde_yaml::to_string(&redacted)
                }
                other => serde_yaml::to_string(other),
            }
            .map_err(GraphError::YamlSerializationError)?;
            out.push_str("---\n");
            out.push_str(&document);
        }
        Ok(out)
    }
}

/// Build the graph of the six-service stack.
pub fn build(
    config: &DeploymentConfig,
    secrets: &SecretBundle,
    hardware: Option<&HardwareFacts>,
) -> Result<ResourceGraph, GraphError> {
    build_from(stack::definitions(config)?, config, secrets, hardware)
}

/// Build the graph of an arbitrary set of definitions. Nothing is returned
/// unless the whole set is consistent.
pub fn build_from(
    definitions: Vec<ServiceDefinition>,
    config: &DeploymentConfig,
    secrets: &SecretBundle,
    hardware: Option<&HardwareFacts>,
) -> Result<ResourceGraph, GraphError> {
    let namespace = config.namespace.as_str();

    let mut dependencies = Dependencies::new();
    for definition in &definitions {
        if dependencies
            .insert(definition.name, definition.depends_on.clone())
            .is_some()
        {
            return Err(GraphError::DuplicateService(definition.name));
        }
    }
    let tiers = tiers::tiers(&dependencies)?;

    let secret_data = secrets.string_data();
    let shared = vec![
        ResourceSpec::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(labels::shared()),
                ..Default::default()
            },
            ..Default::default()
        })
        .stamped()?,
        ResourceSpec::Secret(Secret {
            metadata: meta(SECRET_NAME, namespace, labels::shared()),
            type_: Some("Opaque".to_string()),
            string_data: Some(secret_data.clone()),
            ..Default::default()
        })
        .stamped()?,
    ];

    let mut services = BTreeMap::new();
    for definition in definitions {
        let resources = service_resources(&definition, config, &secret_data, hardware)?;
        debug!(
            service = %definition.name,
            resources = resources.len(),
            "Built service resources"
        );
        services.insert(
            definition.name,
            ServiceResources {
                name: definition.name,
                depends_on: definition.depends_on,
                health_check: definition.health_check,
                resources,
            },
        );
    }

    Ok(ResourceGraph {
        namespace: namespace.to_string(),
        shared,
        services,
        tiers,
    })
}

fn service_resources(
    definition: &ServiceDefinition,
    config: &DeploymentConfig,
    secret_data: &BTreeMap<String, String>,
    hardware: Option<&HardwareFacts>,
) -> Result<Vec<ResourceSpec>, GraphError> {
    let namespace = config.namespace.as_str();
    let env = config_map::env_config_map(definition, namespace);
    let files = config_map::files_config_map(definition, namespace);

    let env_json = serde_json::to_vec(&env.data).map_err(GraphError::JsonSerializationError)?;
    let files_json = serde_json::to_vec(&files.as_ref().and_then(|f| f.data.as_ref()))
        .map_err(GraphError::JsonSerializationError)?;
    let secrets_json = serde_json::to_vec(secret_data).map_err(GraphError::JsonSerializationError)?;
    let config_hash = digest([env_json.as_slice(), files_json.as_slice(), secrets_json.as_slice()]);

    let sizing = sizing::size(&definition.resources, hardware);

    let mut resources = vec![ResourceSpec::ConfigMap(env)];
    resources.extend(files.map(ResourceSpec::ConfigMap));
    resources.extend(
        storage::claim(definition, namespace, &config.storage_class)
            .map(ResourceSpec::PersistentVolumeClaim),
    );
    resources.push(ResourceSpec::Deployment(deployment::deployment(
        definition,
        namespace,
        &sizing,
        &config_hash,
    )));
    resources.push(ResourceSpec::Service(service::service(definition, namespace)));

    resources.into_iter().map(ResourceSpec::stamped).collect()
}
