use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tokio::time::Duration;

use super::config_map::{env_name, files_name};
use super::sizing::ResourceSizing;
use super::storage::claim_name;
use super::{labels, meta, CONFIG_HASH};
use crate::secrets::SECRET_NAME;
use crate::stack::{EnvValue, HealthCheck, ProbeAction, ServiceDefinition};

const DATA_VOLUME: &str = "data";
const FILES_VOLUME: &str = "files";
const LIVENESS_MIN_DELAY: Duration = Duration::from_secs(30);

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn threshold(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub fn readiness_probe(check: &HealthCheck) -> Probe {
    let (tcp_socket, http_get) = match &check.action {
        ProbeAction::TcpSocket { port } => (
            Some(TCPSocketAction {
                port: IntOrString::Int(*port),
                ..Default::default()
            }),
            None,
        ),
        ProbeAction::HttpGet { path, port } => (
            None,
            Some(HTTPGetAction {
                path: Some(path.clone()),
                port: IntOrString::Int(*port),
                ..Default::default()
            }),
        ),
    };

    Probe {
        tcp_socket,
        http_get,
        initial_delay_seconds: Some(seconds(check.initial_delay)),
        period_seconds: Some(seconds(check.period)),
        timeout_seconds: Some(seconds(check.timeout)),
        success_threshold: Some(threshold(check.success_threshold)),
        failure_threshold: Some(threshold(check.failure_threshold)),
        ..Default::default()
    }
}

/// Same check as readiness, but slower to give up on a starting container.
pub fn liveness_probe(check: &HealthCheck) -> Probe {
    let loosened = HealthCheck {
        initial_delay: (check.initial_delay * 6).max(LIVENESS_MIN_DELAY),
        period: check.period * 2,
        // kubelet rejects liveness probes with a success threshold other than 1
        success_threshold: 1,
        failure_threshold: check.failure_threshold * 2,
        ..check.clone()
    };
    readiness_probe(&loosened)
}

fn env_var(definition: &ServiceDefinition, key: &str, value: &EnvValue) -> EnvVar {
    match value {
        EnvValue::Literal(_) => EnvVar {
            name: key.to_string(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: env_name(definition.name),
                    key: key.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvValue::Secret(secret) => EnvVar {
            name: key.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: SECRET_NAME.to_string(),
                    key: secret.key().to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvValue::Template(template) => EnvVar {
            name: key.to_string(),
            value: Some(template.clone()),
            ..Default::default()
        },
    }
}

pub fn deployment(
    definition: &ServiceDefinition,
    namespace: &str,
    sizing: &ResourceSizing,
    config_hash: &str,
) -> Deployment {
    let name = definition.name;

    let mut volumes = vec![];
    let mut volume_mounts = vec![];
    if let Some(storage) = &definition.storage {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(name),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: storage.mount_path.clone(),
            ..Default::default()
        });
    }
    if !definition.files.is_empty() {
        volumes.push(Volume {
            name: FILES_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: files_name(name),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.extend(definition.files.iter().map(|file| VolumeMount {
            name: FILES_VOLUME.to_string(),
            mount_path: file.mount_path.clone(),
            sub_path: Some(file.name.clone()),
            read_only: Some(true),
            ..Default::default()
        }));
    }

    let container = Container {
        name: name.to_string(),
        image: Some(definition.image.clone()),
        env: Some(
            definition
                .env
                .iter()
                .map(|(key, value)| env_var(definition, key, value))
                .collect(),
        ),
        ports: Some(
            definition
                .ports
                .iter()
                .map(|port| ContainerPort {
                    name: Some(port.name.clone()),
                    container_port: port.container_port,
                    ..Default::default()
                })
                .collect(),
        ),
        resources: Some(sizing.requirements()),
        readiness_probe: Some(readiness_probe(&definition.health_check)),
        liveness_probe: Some(liveness_probe(&definition.health_check)),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    // A ReadWriteOnce volume cannot be attached to the old and new pod at once
    let strategy = definition.storage.as_ref().map(|_| DeploymentStrategy {
        type_: Some("Recreate".to_string()),
        ..Default::default()
    });

    Deployment {
        metadata: meta(&name.resource_name(), namespace, labels::service(name)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy,
            selector: LabelSelector {
                match_labels: Some(labels::selector(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels::pod(name)),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH.to_string(),
                        config_hash.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
