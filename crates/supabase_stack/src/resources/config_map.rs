use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{labels, meta};
use crate::stack::{EnvValue, ServiceDefinition, ServiceName};

pub fn env_name(name: ServiceName) -> String {
    format!("{}-config", name.resource_name())
}

pub fn files_name(name: ServiceName) -> String {
    format!("{}-files", name.resource_name())
}

/// Literal environment values of a service, referenced key by key from the pod.
pub fn env_config_map(definition: &ServiceDefinition, namespace: &str) -> ConfigMap {
    let data: BTreeMap<String, String> = definition
        .env
        .iter()
        .filter_map(|(key, value)| match value {
            EnvValue::Literal(v) => Some((key.clone(), v.clone())),
            _ => None,
        })
        .collect();

    ConfigMap {
        metadata: meta(&env_name(definition.name), namespace, labels::service(definition.name)),
        data: Some(data),
        ..Default::default()
    }
}

/// Mounted configuration files, if the service has any.
pub fn files_config_map(definition: &ServiceDefinition, namespace: &str) -> Option<ConfigMap> {
    if definition.files.is_empty() {
        return None;
    }
    let data = definition
        .files
        .iter()
        .map(|file| (file.name.clone(), file.content.clone()))
        .collect();

    Some(ConfigMap {
        metadata: meta(&files_name(definition.name), namespace, labels::service(definition.name)),
        data: Some(data),
        ..Default::default()
    })
}
