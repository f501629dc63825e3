use thiserror::Error;
use tokio::time::Duration;

use crate::stack::ServiceName;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid quantity for {field}: {value:?}")]
    InvalidQuantity { field: String, value: String },

    #[error("unknown service in override: {0}")]
    UnknownService(String),

    #[error("unknown override key: {0}")]
    UnknownKey(String),

    #[error("unknown profile: {0} (available: development, homelab, production)")]
    UnknownProfile(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("OverridesFileError: {0}")]
    OverridesFile(#[source] std::io::Error),

    #[error("YamlError: {0}")]
    Yaml(#[source] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("jwt-secret must be at least 32 characters long (got {length})")]
    JwtSecretTooShort { length: usize },

    #[error("{0} is required when secrets come from the environment")]
    Missing(&'static str),

    #[error("placeholder values rejected in strict mode: {}", .0.join(", "))]
    PlaceholderRejected(Vec<String>),
}

fn join(services: &[ServiceName]) -> String {
    services.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("unknown dependency: {service} depends on {dependency}, which is not deployed")]
    UnknownDependency {
        service: ServiceName,
        dependency: ServiceName,
    },

    #[error("dependency cycle between: {}", join(.0))]
    Cycle(Vec<ServiceName>),

    #[error("service defined twice: {0}")]
    DuplicateService(ServiceName),

    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("YamlSerializationError: {0}")]
    YamlSerializationError(#[source] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Kube Error on {kind} {name}: {source}")]
    KubeError {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("{kind} {name} was not applied within {}s", .timeout.as_secs())]
    Timeout {
        kind: &'static str,
        name: String,
        timeout: Duration,
    },

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("{kind} {name} rejected: {reason}")]
    Rejected {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

impl ApplyError {
    pub fn metric_label(&self) -> String {
        match self {
            ApplyError::KubeError { .. } => "kube_error",
            ApplyError::Timeout { .. } => "timeout",
            ApplyError::MetadataMissing(_) => "metadata_missing",
            ApplyError::Rejected { .. } => "rejected",
        }
        .to_string()
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret Error: {0}")]
    Secret(#[from] SecretError),

    #[error("Graph Error: {0}")]
    Graph(#[from] GraphError),

    #[error("Apply Error: {0}")]
    Apply(#[from] ApplyError),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::Config(_) => "config_error".to_string(),
            Error::Secret(_) => "secret_error".to_string(),
            Error::Graph(_) => "graph_error".to_string(),
            Error::Apply(e) => e.metric_label(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_members() {
        let err = GraphError::Cycle(vec![ServiceName::Kong, ServiceName::Postgres]);
        assert_eq!(err.to_string(), "dependency cycle between: kong, postgres");
    }

    #[test]
    fn metric_labels_are_stable() {
        let err = Error::from(SecretError::JwtSecretTooShort { length: 3 });
        assert_eq!(err.metric_label(), "secret_error");

        let err = Error::from(ApplyError::Timeout {
            kind: "Deployment",
            name: "supabase-kong".to_string(),
            timeout: Duration::from_secs(30),
        });
        assert_eq!(err.metric_label(), "timeout");
        assert_eq!(
            err.to_string(),
            "Apply Error: Deployment supabase-kong was not applied within 30s"
        );
    }
}
