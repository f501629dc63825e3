//! Configuration resolution.
//!
//! Layers, lowest to highest precedence: built-in defaults, an optional
//! profile preset, the environment snapshot, explicit overrides. The result
//! is a fully populated [`DeploymentConfig`] that is never mutated again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::debug;

use crate::secrets::SecretKey;
use crate::stack::{PerService, ServiceName};
use crate::util::errors::ConfigError;
use crate::util::quantity::{ResourceAmount, StorageSize};

pub mod environment;
pub mod overrides;
pub mod profile;

pub use environment::Environment;
pub use overrides::{PartialConfig, ServiceOverrides};
pub use profile::Profile;

pub const DEFAULT_NAMESPACE: &str = "supabase";
pub const DEFAULT_STORAGE_CLASS: &str = "local-path";
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsSource {
    /// Every secret must be supplied by the environment.
    Environment,
    /// Missing secrets are generated at deploy time.
    #[default]
    Generated,
}

impl FromStr for SecretsSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "environment" => Ok(SecretsSource::Environment),
            "generated" => Ok(SecretsSource::Generated),
            other => Err(ConfigError::InvalidValue {
                key: "secrets_source".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceSettings {
    pub image: String,
    pub memory: ResourceAmount,
    pub cpu: ResourceAmount,
    pub storage: Option<StorageSize>,
}

struct ServiceDefaults {
    image: &'static str,
    memory: &'static str,
    cpu: &'static str,
    storage: Option<&'static str>,
}

impl ServiceDefaults {
    fn of(name: ServiceName) -> Self {
        match name {
            ServiceName::Postgres => ServiceDefaults {
                image: "supabase/postgres:15.1.0.147",
                memory: "25%",
                cpu: "25%",
                storage: Some("10Gi"),
            },
            ServiceName::Postgrest => ServiceDefaults {
                image: "postgrest/postgrest:v11.2.0",
                memory: "5%",
                cpu: "5%",
                storage: None,
            },
            ServiceName::Gotrue => ServiceDefaults {
                image: "supabase/gotrue:v2.132.3",
                memory: "5%",
                cpu: "5%",
                storage: None,
            },
            ServiceName::Realtime => ServiceDefaults {
                image: "supabase/realtime:v2.25.50",
                memory: "5%",
                cpu: "5%",
                storage: None,
            },
            ServiceName::Storage => ServiceDefaults {
                image: "supabase/storage-api:v0.43.11",
                memory: "10%",
                cpu: "10%",
                storage: Some("20Gi"),
            },
            ServiceName::Kong => ServiceDefaults {
                image: "kong:3.4",
                memory: "5%",
                cpu: "5%",
                storage: None,
            },
        }
    }
}

/// Resolved, immutable configuration for one deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentConfig {
    pub namespace: String,
    /// Kubeconfig files from `KUBECONFIG`, merged in order by the client.
    pub kubeconfig: Vec<PathBuf>,
    pub profile: Option<Profile>,
    pub services: PerService<ServiceSettings>,
    pub secrets_source: SecretsSource,
    /// Secret values supplied by the environment, verbatim.
    pub secret_values: BTreeMap<SecretKey, String>,
    pub strict_secrets: bool,
    pub storage_class: String,
    pub health_timeout: Duration,
    pub apply_timeout: Duration,
}

impl DeploymentConfig {
    pub fn service(&self, name: ServiceName) -> &ServiceSettings {
        self.services.get(name)
    }

    pub fn secret_value(&self, key: SecretKey) -> Option<&str> {
        self.secret_values.get(&key).map(String::as_str)
    }
}

/// Merge defaults, profile, environment and `overrides` into a [`DeploymentConfig`].
pub fn resolve(
    overrides: PartialConfig,
    env: &Environment,
) -> Result<DeploymentConfig, ConfigError> {
    let from_env = PartialConfig::from_environment(env)?;

    let profile = overrides
        .profile
        .clone()
        .or_else(|| from_env.profile.clone())
        .map(|p| p.parse::<Profile>())
        .transpose()?;

    let layered = profile
        .map(|p| p.overrides())
        .unwrap_or_default()
        .merge(from_env)
        .merge(overrides);

    let namespace = layered
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    validate_dns_label("namespace", &namespace)?;

    let storage_class = layered
        .storage_class
        .clone()
        .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string());

    let services =
        PerService::try_from_fn(|name| resolve_service(name, layered.services.get(name)))?;

    let secret_values = SecretKey::ALL
        .into_iter()
        .filter_map(|key| env.get(key.env_var()).map(|v| (key, v.to_string())))
        .collect::<BTreeMap<_, _>>();

    let kubeconfig = env
        .get("KUBECONFIG")
        .map(|paths| std::env::split_paths(paths).collect())
        .unwrap_or_default();

    let config = DeploymentConfig {
        namespace,
        kubeconfig,
        profile,
        services,
        secrets_source: layered.secrets_source.unwrap_or_default(),
        secret_values,
        strict_secrets: layered.strict_secrets.unwrap_or(false),
        storage_class,
        health_timeout: timeout(
            "health_timeout_secs",
            layered.health_timeout_secs,
            DEFAULT_HEALTH_TIMEOUT,
        )?,
        apply_timeout: timeout(
            "apply_timeout_secs",
            layered.apply_timeout_secs,
            DEFAULT_APPLY_TIMEOUT,
        )?,
    };

    debug!(
        namespace = %config.namespace,
        profile = config.profile.map(|p| p.as_str()),
        env_secrets = config.secret_values.len(),
        "Resolved deployment configuration"
    );
    Ok(config)
}

fn resolve_service(
    name: ServiceName,
    layered: &ServiceOverrides,
) -> Result<ServiceSettings, ConfigError> {
    let defaults = ServiceDefaults::of(name);
    let field = |f: &str| format!("{name}.{f}");

    let image = layered
        .image
        .clone()
        .unwrap_or_else(|| defaults.image.to_string());
    if image.is_empty() || image.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidValue {
            key: field("image"),
            value: image,
        });
    }

    let memory = ResourceAmount::memory(
        &field("memory"),
        layered.memory.as_deref().unwrap_or(defaults.memory),
    )?;
    let cpu = ResourceAmount::cpu(&field("cpu"), layered.cpu.as_deref().unwrap_or(defaults.cpu))?;

    let storage = match (defaults.storage, layered.storage.as_deref()) {
        (Some(default), requested) => Some(StorageSize::parse(
            &field("storage"),
            requested.unwrap_or(default),
        )?),
        (None, Some(_)) => return Err(ConfigError::UnknownKey(field("storage"))),
        (None, None) => None,
    };

    Ok(ServiceSettings {
        image,
        memory,
        cpu,
        storage,
    })
}

fn timeout(key: &str, secs: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match secs {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn validate_dns_label(key: &str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
