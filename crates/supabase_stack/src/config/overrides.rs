use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::SecretsSource;
use super::environment::Environment;
use crate::stack::{PerService, ServiceName};
use crate::util::errors::ConfigError;

/// One configuration layer. Unset fields fall through to the layer below.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub namespace: Option<String>,
    pub profile: Option<String>,
    pub secrets_source: Option<SecretsSource>,
    pub strict_secrets: Option<bool>,
    pub storage_class: Option<String>,
    pub health_timeout_secs: Option<u64>,
    pub apply_timeout_secs: Option<u64>,
    pub services: PerService<ServiceOverrides>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceOverrides {
    pub image: Option<String>,
    #[serde(deserialize_with = "scalar")]
    pub memory: Option<String>,
    #[serde(deserialize_with = "scalar")]
    pub cpu: Option<String>,
    pub storage: Option<String>,
}

impl ServiceOverrides {
    fn merge(self, higher: ServiceOverrides) -> ServiceOverrides {
        ServiceOverrides {
            image: higher.image.or(self.image),
            memory: higher.memory.or(self.memory),
            cpu: higher.cpu.or(self.cpu),
            storage: higher.storage.or(self.storage),
        }
    }
}

impl PartialConfig {
    /// Parse dotted `key=value` pairs such as `postgres.storage=50Gi`.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigError> {
        let mut partial = PartialConfig::default();
        for (key, value) in pairs {
            partial.set(key.trim(), value.trim())?;
        }
        Ok(partial)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str::<Option<PartialConfig>>(raw)
            .map(Option::unwrap_or_default)
            .map_err(ConfigError::Yaml)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::OverridesFile)?;
        Self::from_yaml(&raw)
    }

    pub(crate) fn from_environment(env: &Environment) -> Result<Self, ConfigError> {
        let mut partial = PartialConfig::default();
        for (var, key) in [
            ("SUPABASE_NAMESPACE", "namespace"),
            ("SUPABASE_PROFILE", "profile"),
            ("SUPABASE_SECRETS_SOURCE", "secrets_source"),
            ("SUPABASE_STRICT_SECRETS", "strict_secrets"),
            ("SUPABASE_STORAGE_CLASS", "storage_class"),
        ] {
            if let Some(value) = env.get(var) {
                partial.set(key, value)?;
            }
        }
        Ok(partial)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some((service, field)) = key.split_once('.') {
            let name: ServiceName = service.parse()?;
            let overrides = self.services.get_mut(name);
            let slot = match field {
                "image" => &mut overrides.image,
                "memory" => &mut overrides.memory,
                "cpu" => &mut overrides.cpu,
                "storage" => &mut overrides.storage,
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            };
            *slot = Some(value.to_string());
            return Ok(());
        }

        match key {
            "namespace" => self.namespace = Some(value.to_string()),
            "profile" => self.profile = Some(value.to_string()),
            "storage_class" => self.storage_class = Some(value.to_string()),
            "secrets_source" => self.secrets_source = Some(value.parse()?),
            "strict_secrets" => self.strict_secrets = Some(parse_bool(key, value)?),
            "health_timeout_secs" => self.health_timeout_secs = Some(parse_secs(key, value)?),
            "apply_timeout_secs" => self.apply_timeout_secs = Some(parse_secs(key, value)?),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Layer `higher` on top of `self`.
    pub fn merge(self, higher: PartialConfig) -> PartialConfig {
        let mut lower = self.services;
        let services = PerService::from_fn(|name| {
            std::mem::take(lower.get_mut(name)).merge(higher.services.get(name).clone())
        });
        PartialConfig {
            namespace: higher.namespace.or(self.namespace),
            profile: higher.profile.or(self.profile),
            secrets_source: higher.secrets_source.or(self.secrets_source),
            strict_secrets: higher.strict_secrets.or(self.strict_secrets),
            storage_class: higher.storage_class.or(self.storage_class),
            health_timeout_secs: higher.health_timeout_secs.or(self.health_timeout_secs),
            apply_timeout_secs: higher.apply_timeout_secs.or(self.apply_timeout_secs),
            services,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim_end_matches('s').parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(u64),
    Float(f64),
}

/// YAML writes `cpu: 2` as a number; keep every quantity as text.
fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Text(s) => s,
        Scalar::Integer(n) => n.to_string(),
        Scalar::Float(f) => f.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_keys_address_services() {
        let partial = PartialConfig::from_pairs([
            ("kong.image", "kong:3.5"),
            ("storage.storage", "200Gi"),
            ("strict_secrets", "yes"),
        ])
        .unwrap();
        assert_eq!(partial.services.kong.image.as_deref(), Some("kong:3.5"));
        assert_eq!(partial.services.storage.storage.as_deref(), Some("200Gi"));
        assert_eq!(partial.strict_secrets, Some(true));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            PartialConfig::from_pairs([("studio.image", "x")]),
            Err(ConfigError::UnknownService(s)) if s == "studio"
        ));
        assert!(matches!(
            PartialConfig::from_pairs([("kong.replicas", "3")]),
            Err(ConfigError::UnknownKey(k)) if k == "kong.replicas"
        ));
        assert!(matches!(
            PartialConfig::from_pairs([("strict_secrets", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn yaml_overrides() {
        let partial = PartialConfig::from_yaml(
            r#"
namespace: supabase-lab
secrets_source: environment
services:
  postgres:
    memory: 4Gi
    cpu: 2
"#,
        )
        .unwrap();
        assert_eq!(partial.namespace.as_deref(), Some("supabase-lab"));
        assert_eq!(partial.secrets_source, Some(SecretsSource::Environment));
        assert_eq!(partial.services.postgres.memory.as_deref(), Some("4Gi"));
        assert_eq!(partial.services.postgres.cpu.as_deref(), Some("2"));
        assert_eq!(PartialConfig::from_yaml("").unwrap(), PartialConfig::default());
        assert!(PartialConfig::from_yaml("replicas: 3").is_err());
    }

    #[test]
    fn merge_prefers_higher_layer() {
        let lower = PartialConfig::from_pairs([
            ("namespace", "a"),
            ("postgres.memory", "1Gi"),
            ("postgres.cpu", "1"),
        ])
        .unwrap();
        let higher =
            PartialConfig::from_pairs([("namespace", "b"), ("postgres.memory", "2Gi")]).unwrap();
        let merged = lower.merge(higher);
        assert_eq!(merged.namespace.as_deref(), Some("b"));
        assert_eq!(merged.services.postgres.memory.as_deref(), Some("2Gi"));
        assert_eq!(merged.services.postgres.cpu.as_deref(), Some("1"));
    }
}
