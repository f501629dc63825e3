use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{ApplyOutcome, ConditionSet, DeleteOutcome, ResourceApplier, ResourceHandle};
use crate::resources::labels::MANAGER;
use crate::resources::{ResourceSpec, SPEC_HASH};
use crate::secrets::SecretData;
use crate::util::errors::ApplyError;

/// [`ResourceApplier`] over a live cluster.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        KubeApplier { client }
    }

    fn namespaced<K>(&self, spec: &ResourceSpec) -> Result<Api<K>, ApplyError>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = spec.namespace().ok_or_else(|| {
            ApplyError::MetadataMissing(format!(
                "{} {} has no namespace",
                spec.kind(),
                spec.name()
            ))
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

fn kube_error(kind: &'static str, name: &str, source: kube::Error) -> ApplyError {
    match source {
        kube::Error::Api(response) if matches!(response.code, 400 | 403 | 409 | 422) => {
            ApplyError::Rejected {
                kind,
                name: name.to_string(),
                reason: response.message,
            }
        }
        source => ApplyError::KubeError {
            kind,
            name: name.to_string(),
            source,
        },
    }
}

/// Create on absence, server-side apply when the recorded spec hash differs.
async fn upsert<K>(
    api: Api<K>,
    spec: &ResourceSpec,
    desired: &K,
) -> Result<ResourceHandle, ApplyError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = spec.kind();
    let name = spec.name();

    let existing = api.get_opt(name).await.map_err(|e| kube_error(kind, name, e))?;
    let recorded = existing
        .as_ref()
        .and_then(|e| e.annotations().get(SPEC_HASH).map(String::as_str));
    let outcome = match &existing {
        None => {
            info!("Creating {} '{}'", kind, name);
            api.create(&PostParams::default(), desired)
                .await
                .map_err(|e| kube_error(kind, name, e))?;
            ApplyOutcome::Created
        }
        Some(_) if recorded == spec.spec_hash() => {
            debug!("{} '{}' is up to date", kind, name);
            ApplyOutcome::Unchanged
        }
        Some(_) => {
            info!("Updating {} '{}'", kind, name);
            api.patch(name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(desired))
                .await
                .map_err(|e| kube_error(kind, name, e))?;
            ApplyOutcome::Updated
        }
    };
    Ok(ResourceHandle::new(spec, outcome))
}

async fn remove<K>(api: Api<K>, spec: &ResourceSpec) -> Result<DeleteOutcome, ApplyError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(spec.name(), &DeleteParams::background()).await {
        Ok(_) => {
            info!("Deleting {} '{}'", spec.kind(), spec.name());
            Ok(DeleteOutcome::Deleted)
        }
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(kube_error(spec.kind(), spec.name(), e)),
    }
}

#[async_trait]
impl ResourceApplier for KubeApplier {
    async fn apply(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ApplyError> {
        match spec {
            ResourceSpec::Namespace(r) => upsert(Api::all(self.client.clone()), spec, r).await,
            ResourceSpec::Secret(r) => upsert(self.namespaced(spec)?, spec, r).await,
            ResourceSpec::ConfigMap(r) => upsert(self.namespaced(spec)?, spec, r).await,
            ResourceSpec::PersistentVolumeClaim(r) => upsert(self.namespaced(spec)?, spec, r).await,
            ResourceSpec::Deployment(r) => upsert(self.namespaced(spec)?, spec, r).await,
            ResourceSpec::Service(r) => upsert(self.namespaced(spec)?, spec, r).await,
        }
    }

    async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome, ApplyError> {
        match spec {
            ResourceSpec::Namespace(_) => {
                remove::<Namespace>(Api::all(self.client.clone()), spec).await
            }
            ResourceSpec::Secret(_) => remove::<Secret>(self.namespaced(spec)?, spec).await,
            ResourceSpec::ConfigMap(_) => remove::<ConfigMap>(self.namespaced(spec)?, spec).await,
            ResourceSpec::PersistentVolumeClaim(_) => {
                remove::<PersistentVolumeClaim>(self.namespaced(spec)?, spec).await
            }
            ResourceSpec::Deployment(_) => remove::<Deployment>(self.namespaced(spec)?, spec).await,
            ResourceSpec::Service(_) => remove::<Service>(self.namespaced(spec)?, spec).await,
        }
    }

    async fn status(&self, handle: &ResourceHandle) -> Result<ConditionSet, ApplyError> {
        if handle.kind != "Deployment" {
            return Ok(ConditionSet::present());
        }
        let namespace = handle.namespace.as_deref().ok_or_else(|| {
            ApplyError::MetadataMissing(format!("Deployment {} has no namespace", handle.name))
        })?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments
            .get_opt(&handle.name)
            .await
            .map_err(|e| kube_error(handle.kind, &handle.name, e))?;
        Ok(deployment
            .as_ref()
            .map(ConditionSet::from_deployment)
            .unwrap_or_else(ConditionSet::missing))
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, ApplyError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|e| kube_error("Secret", name, e))?;

        Ok(secret.map(|secret| {
            let mut data: SecretData = secret
                .data
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(key, value)| String::from_utf8(value.0).ok().map(|v| (key, v)))
                .collect();
            data.extend(secret.string_data.unwrap_or_default());
            data
        }))
    }
}
