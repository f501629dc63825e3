//! Secret material for the stack: taken from the environment, reused from the
//! cluster, or generated, then checked against known placeholder values.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{DeploymentConfig, SecretsSource};
use crate::util::errors::SecretError;

/// Name of the single Kubernetes Secret holding the bundle.
pub const SECRET_NAME: &str = "supabase-secrets";

pub const MIN_JWT_SECRET_LENGTH: usize = 32;
pub const MIN_API_KEY_LENGTH: usize = 32;

const DEFAULT_DASHBOARD_USERNAME: &str = "supabase";

/// Decoded contents of an existing Secret.
pub type SecretData = BTreeMap<String, String>;

const PLACEHOLDERS: &[&str] = &[
    "your-secure-password",
    "your-secure-postgres-password",
    "changeme",
    "password",
    "your-jwt-secret-key-here-minimum-32-characters",
    "your-jwt-secret-key-here-must-be-32-chars",
    "your-anon-key-here",
    "your-service-key-here",
];

const PLACEHOLDER_FRAGMENTS: &[&str] = &["change-me", "replace-with-secure-value"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretKey {
    PostgresPassword,
    JwtSecret,
    AnonKey,
    ServiceKey,
    DashboardUsername,
    DashboardPassword,
}

impl SecretKey {
    pub const ALL: [SecretKey; 6] = [
        SecretKey::PostgresPassword,
        SecretKey::JwtSecret,
        SecretKey::AnonKey,
        SecretKey::ServiceKey,
        SecretKey::DashboardUsername,
        SecretKey::DashboardPassword,
    ];

    /// Key inside the `supabase-secrets` Secret.
    pub fn key(&self) -> &'static str {
        match self {
            SecretKey::PostgresPassword => "postgres-password",
            SecretKey::JwtSecret => "jwt-secret",
            SecretKey::AnonKey => "anon-key",
            SecretKey::ServiceKey => "service-key",
            SecretKey::DashboardUsername => "dashboard-username",
            SecretKey::DashboardPassword => "dashboard-password",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            SecretKey::PostgresPassword => "SUPABASE_POSTGRES_PASSWORD",
            SecretKey::JwtSecret => "SUPABASE_JWT_SECRET",
            SecretKey::AnonKey => "SUPABASE_ANON_KEY",
            SecretKey::ServiceKey => "SUPABASE_SERVICE_KEY",
            SecretKey::DashboardUsername => "SUPABASE_DASHBOARD_USERNAME",
            SecretKey::DashboardPassword => "SUPABASE_DASHBOARD_PASSWORD",
        }
    }

    fn generate(&self) -> String {
        match self {
            SecretKey::PostgresPassword | SecretKey::DashboardPassword => {
                hex::encode(random_bytes(32))
            }
            SecretKey::JwtSecret => URL_SAFE_NO_PAD.encode(random_bytes(48)),
            SecretKey::AnonKey | SecretKey::ServiceKey => URL_SAFE_NO_PAD.encode(random_bytes(32)),
            SecretKey::DashboardUsername => DEFAULT_DASHBOARD_USERNAME.to_string(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WarningKind {
    Placeholder,
    TooShort { length: usize },
}

/// A weak secret value that does not block deployment on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SecretWarning {
    pub key: SecretKey,
    #[serde(flatten)]
    pub kind: WarningKind,
}

impl fmt::Display for SecretWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            WarningKind::Placeholder => write!(f, "{} uses a placeholder value", self.key),
            WarningKind::TooShort { length } => write!(
                f,
                "{} is {length} characters, at least {MIN_API_KEY_LENGTH} are recommended",
                self.key
            ),
        }
    }
}

/// Where a secret value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretOrigin {
    Environment,
    Cluster,
    Generated,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    values: BTreeMap<SecretKey, String>,
    origins: BTreeMap<SecretKey, SecretOrigin>,
}

impl SecretBundle {
    pub fn get(&self, key: SecretKey) -> &str {
        self.values.get(&key).map(String::as_str).unwrap_or_default()
    }

    pub fn origin(&self, key: SecretKey) -> Option<SecretOrigin> {
        self.origins.get(&key).copied()
    }

    /// `stringData` of the `supabase-secrets` Secret.
    pub fn string_data(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(key, value)| (key.key().to_string(), value.clone()))
            .collect()
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, origin) in &self.origins {
            map.entry(&key.key(), &format_args!("<redacted, {origin:?}>"));
        }
        map.finish()
    }
}

/// Build the bundle for `config`, reusing values from `existing` when the
/// environment does not supply them.
pub fn synthesize(
    config: &DeploymentConfig,
    existing: Option<&SecretData>,
) -> Result<(SecretBundle, Vec<SecretWarning>), SecretError> {
    let mut values = BTreeMap::new();
    let mut origins = BTreeMap::new();

    for key in SecretKey::ALL {
        let from_env = config.secret_value(key);
        let from_cluster = existing
            .and_then(|data| data.get(key.key()))
            .map(String::as_str)
            .filter(|v| !v.is_empty());

        let (value, origin) = match (config.secrets_source, from_env, from_cluster) {
            (_, Some(value), _) => (value.to_string(), SecretOrigin::Environment),
            (SecretsSource::Environment, None, _) => {
                return Err(SecretError::Missing(key.env_var()))
            }
            (SecretsSource::Generated, None, Some(value)) => {
                (value.to_string(), SecretOrigin::Cluster)
            }
            (SecretsSource::Generated, None, None) => (key.generate(), SecretOrigin::Generated),
        };
        debug!(key = key.key(), ?origin, "Resolved secret value");
        values.insert(key, value);
        origins.insert(key, origin);
    }

    let jwt_length = values.get(&SecretKey::JwtSecret).map_or(0, |v| v.chars().count());
    if jwt_length < MIN_JWT_SECRET_LENGTH {
        return Err(SecretError::JwtSecretTooShort { length: jwt_length });
    }

    let warnings = check(&values);
    for warning in &warnings {
        warn!(key = warning.key.key(), "{warning}");
    }
    if config.strict_secrets && !warnings.is_empty() {
        let mut rejected: Vec<String> = warnings.iter().map(|w| w.key.key().to_string()).collect();
        rejected.dedup();
        return Err(SecretError::PlaceholderRejected(rejected));
    }

    Ok((SecretBundle { values, origins }, warnings))
}

fn check(values: &BTreeMap<SecretKey, String>) -> Vec<SecretWarning> {
    let mut warnings = vec![];
    for (&key, value) in values {
        if key != SecretKey::DashboardUsername && is_placeholder(value) {
            warnings.push(SecretWarning {
                key,
                kind: WarningKind::Placeholder,
            });
        }
        if matches!(key, SecretKey::AnonKey | SecretKey::ServiceKey) {
            let length = value.chars().count();
            if length < MIN_API_KEY_LENGTH {
                warnings.push(SecretWarning {
                    key,
                    kind: WarningKind::TooShort { length },
                });
            }
        }
    }
    warnings
}

pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    PLACEHOLDERS.contains(&lowered.as_str())
        || PLACEHOLDER_FRAGMENTS.iter().any(|fragment| lowered.contains(fragment))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
