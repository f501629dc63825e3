use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};

use super::{labels, meta};
use crate::stack::{ServiceDefinition, ServiceName};

pub fn claim_name(name: ServiceName) -> String {
    format!("{}-pvc", name.resource_name())
}

pub fn claim(
    definition: &ServiceDefinition,
    namespace: &str,
    storage_class: &str,
) -> Option<PersistentVolumeClaim> {
    let volume = definition.storage.as_ref()?;
    let requests = BTreeMap::from([("storage".to_string(), volume.size.to_quantity())]);

    Some(PersistentVolumeClaim {
        metadata: meta(&claim_name(definition.name), namespace, labels::service(definition.name)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage_class.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
