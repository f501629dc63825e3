//! Kubernetes objects for a stack and the graph that orders them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service};
use kube::api::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::util::errors::GraphError;

pub mod config_map;
pub mod deployment;
pub mod graph;
pub mod labels;
pub mod service;
pub mod sizing;
pub mod storage;

pub use graph::{build, build_from, ResourceGraph, ServiceResources};

/// Hash of the rendered object, compared by the applier to skip no-op updates.
pub const SPEC_HASH: &str = "supabase.io/spec-hash";
/// Hash of everything a pod reads from ConfigMaps and the Secret.
pub const CONFIG_HASH: &str = "supabase.io/config-hash";

/// One object the stack owns.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    Namespace(Namespace),
    Secret(Secret),
    ConfigMap(ConfigMap),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Service(Service),
}

impl ResourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceSpec::Namespace(_) => "Namespace",
            ResourceSpec::Secret(_) => "Secret",
            ResourceSpec::ConfigMap(_) => "ConfigMap",
            ResourceSpec::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            ResourceSpec::Deployment(_) => "Deployment",
            ResourceSpec::Service(_) => "Service",
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ResourceSpec::Namespace(r) => &r.metadata,
            ResourceSpec::Secret(r) => &r.metadata,
            ResourceSpec::ConfigMap(r) => &r.metadata,
            ResourceSpec::PersistentVolumeClaim(r) => &r.metadata,
            ResourceSpec::Deployment(r) => &r.metadata,
            ResourceSpec::Service(r) => &r.metadata,
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ResourceSpec::Namespace(r) => &mut r.metadata,
            ResourceSpec::Secret(r) => &mut r.metadata,
            ResourceSpec::ConfigMap(r) => &mut r.metadata,
            ResourceSpec::PersistentVolumeClaim(r) => &mut r.metadata,
            ResourceSpec::Deployment(r) => &mut r.metadata,
            ResourceSpec::Service(r) => &mut r.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    pub fn spec_hash(&self) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(SPEC_HASH))
            .map(String::as_str)
    }

    /// Annotate the object with the hash of its body.
    pub(crate) fn stamped(mut self) -> Result<Self, GraphError> {
        if let Some(annotations) = self.meta_mut().annotations.as_mut() {
            annotations.remove(SPEC_HASH);
        }
        let body = serde_json::to_vec(&self).map_err(GraphError::JsonSerializationError)?;
        let hash = digest([body.as_slice()]);
        self.meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(SPEC_HASH.to_string(), hash);
        Ok(self)
    }
}

/// Hex SHA-256 over `parts`, in order.
pub(crate) fn digest<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

pub(crate) fn meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(value: &str) -> ResourceSpec {
        ResourceSpec::ConfigMap(ConfigMap {
            metadata: meta("supabase-kong-config", "supabase", BTreeMap::new()),
            data: Some(BTreeMap::from([("KONG_LOG_LEVEL".to_string(), value.to_string())])),
            ..Default::default()
        })
    }

    #[test]
    fn stamping_is_stable_and_content_sensitive() {
        let a = config_map("info").stamped().unwrap();
        let again = a.clone().stamped().unwrap();
        let b = config_map("debug").stamped().unwrap();

        assert_eq!(a.spec_hash().map(str::len), Some(64));
        assert_eq!(a.spec_hash(), again.spec_hash());
        assert_ne!(a.spec_hash(), b.spec_hash());
        assert_eq!(a.kind(), "ConfigMap");
        assert_eq!(a.name(), "supabase-kong-config");
        assert_eq!(a.namespace(), Some("supabase"));
    }
}
