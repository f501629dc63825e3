use std::collections::BTreeSet;

use tokio::time::Duration;

use super::kong::{self, DeclarativeConfig};
use super::{
    ConfigFile, EnvValue, Exposure, HealthCheck, PortSpec, ResourceTargets, ServiceDefinition,
    ServiceName, VolumeSpec,
};
use crate::config::DeploymentConfig;
use crate::secrets::SecretKey;
use crate::util::errors::GraphError;

pub const POSTGRES_PORT: i32 = 5432;
pub const POSTGREST_PORT: i32 = 3000;
pub const GOTRUE_PORT: i32 = 9999;
pub const REALTIME_PORT: i32 = 4000;
pub const STORAGE_PORT: i32 = 5000;
pub const KONG_PROXY_PORT: i32 = 8000;
pub const KONG_ADMIN_PORT: i32 = 8001;
pub const KONG_PROXY_NODE_PORT: i32 = 30080;
pub const KONG_ADMIN_NODE_PORT: i32 = 30081;

const DB_USER: &str = "supabase_admin";
const DB_NAME: &str = "postgres";
const POSTGRES_DATA: &str = "/var/lib/postgresql/data";
const STORAGE_DATA: &str = "/var/lib/storage";

fn literal(key: &str, value: impl Into<String>) -> (String, EnvValue) {
    (key.to_string(), EnvValue::Literal(value.into()))
}

fn secret(key: &str, secret: SecretKey) -> (String, EnvValue) {
    (key.to_string(), EnvValue::Secret(secret))
}

/// Connection URL with the password expanded from `POSTGRES_PASSWORD` by the kubelet.
/// The password variable must precede it in the env list.
fn database_url(key: &str) -> [(String, EnvValue); 2] {
    [
        secret("POSTGRES_PASSWORD", SecretKey::PostgresPassword),
        (
            key.to_string(),
            EnvValue::Template(format!(
                "postgres://{DB_USER}:$(POSTGRES_PASSWORD)@{}:{POSTGRES_PORT}/{DB_NAME}",
                ServiceName::Postgres.service_host()
            )),
        ),
    ]
}

/// The six service definitions of a stack, configured by `config`.
pub fn definitions(config: &DeploymentConfig) -> Result<Vec<ServiceDefinition>, GraphError> {
    let mut definitions = Vec::with_capacity(ServiceName::ALL.len());
    for name in ServiceName::ALL {
        definitions.push(definition(config, name)?);
    }
    Ok(definitions)
}

fn definition(
    config: &DeploymentConfig,
    name: ServiceName,
) -> Result<ServiceDefinition, GraphError> {
    let settings = config.service(name);
    let startup = Duration::from_secs(5);

    let mut env: Vec<(String, EnvValue)> = vec![];
    let mut files = vec![];
    let mut exposure = Exposure::ClusterIp;
    let mut depends_on = BTreeSet::from([ServiceName::Postgres]);
    let (ports, health_check, mount_path) = match name {
        ServiceName::Postgres => {
            depends_on.clear();
            env.extend([
                literal("POSTGRES_DB", DB_NAME),
                literal("POSTGRES_USER", DB_USER),
                secret("POSTGRES_PASSWORD", SecretKey::PostgresPassword),
                secret("JWT_SECRET", SecretKey::JwtSecret),
                literal("PGDATA", format!("{POSTGRES_DATA}/pgdata")),
            ]);
            (
                vec![PortSpec::new("postgres", POSTGRES_PORT)],
                HealthCheck::tcp(POSTGRES_PORT, Duration::from_secs(10)),
                Some(POSTGRES_DATA),
            )
        }
        ServiceName::Postgrest => {
            env.extend(database_url("PGRST_DB_URI"));
            env.extend([
                literal("PGRST_DB_SCHEMAS", "public"),
                literal("PGRST_DB_ANON_ROLE", "anon"),
                literal("PGRST_DB_USE_LEGACY_GUCS", "false"),
                secret("PGRST_JWT_SECRET", SecretKey::JwtSecret),
            ]);
            (
                vec![PortSpec::new("http", POSTGREST_PORT)],
                HealthCheck::tcp(POSTGREST_PORT, startup),
                None,
            )
        }
        ServiceName::Gotrue => {
            env.extend([
                literal("GOTRUE_API_HOST", "0.0.0.0"),
                literal("GOTRUE_API_PORT", GOTRUE_PORT.to_string()),
                literal("GOTRUE_DB_DRIVER", "postgres"),
            ]);
            env.extend(database_url("GOTRUE_DB_DATABASE_URL"));
            env.extend([
                literal("GOTRUE_SITE_URL", "http://localhost:3000"),
                literal("GOTRUE_URI_ALLOW_LIST", "*"),
                literal("API_EXTERNAL_URL", format!("http://localhost:{KONG_PROXY_NODE_PORT}")),
                secret("GOTRUE_JWT_SECRET", SecretKey::JwtSecret),
            ]);
            (
                vec![PortSpec::new("http", GOTRUE_PORT)],
                HealthCheck::http("/health", GOTRUE_PORT, startup),
                None,
            )
        }
        ServiceName::Realtime => {
            env.extend([
                literal("PORT", REALTIME_PORT.to_string()),
                literal("DB_HOST", ServiceName::Postgres.service_host()),
                literal("DB_PORT", POSTGRES_PORT.to_string()),
                literal("DB_NAME", DB_NAME),
                literal("DB_USER", DB_USER),
                literal("DB_SSL", "false"),
                secret("DB_PASSWORD", SecretKey::PostgresPassword),
                secret("JWT_SECRET", SecretKey::JwtSecret),
            ]);
            (
                vec![PortSpec::new("http", REALTIME_PORT)],
                HealthCheck::tcp(REALTIME_PORT, startup),
                None,
            )
        }
        ServiceName::Storage => {
            env.extend([
                secret("ANON_KEY", SecretKey::AnonKey),
                secret("SERVICE_KEY", SecretKey::ServiceKey),
                secret("PGRST_JWT_SECRET", SecretKey::JwtSecret),
                literal(
                    "POSTGREST_URL",
                    format!("http://{}:{POSTGREST_PORT}", ServiceName::Postgrest.service_host()),
                ),
            ]);
            env.extend(database_url("DATABASE_URL"));
            env.extend([
                literal("FILE_STORAGE_BACKEND", "file"),
                literal("STORAGE_BACKEND", "file"),
                literal("FILE_STORAGE_DIRECTORY", STORAGE_DATA),
            ]);
            (
                vec![PortSpec::new("http", STORAGE_PORT)],
                HealthCheck::http("/status", STORAGE_PORT, startup),
                Some(STORAGE_DATA),
            )
        }
        ServiceName::Kong => {
            depends_on = BTreeSet::from([
                ServiceName::Postgrest,
                ServiceName::Gotrue,
                ServiceName::Realtime,
                ServiceName::Storage,
            ]);
            env.extend([
                literal("KONG_DATABASE", "off"),
                literal("KONG_DECLARATIVE_CONFIG", kong::CONFIG_PATH),
                literal("KONG_DNS_ORDER", "LAST,A,CNAME"),
                literal("KONG_PLUGINS", "request-id,cors"),
                literal("KONG_NGINX_PROXY_PROXY_BUFFER_SIZE", "160k"),
                literal("KONG_NGINX_PROXY_PROXY_BUFFERS", "64 160k"),
                literal("KONG_LOG_LEVEL", "info"),
            ]);
            files.push(ConfigFile {
                name: kong::CONFIG_FILE.to_string(),
                mount_path: kong::CONFIG_PATH.to_string(),
                content: DeclarativeConfig::for_stack().to_yaml()?,
            });
            exposure = Exposure::NodePort;
            (
                vec![
                    PortSpec::new("proxy", KONG_PROXY_PORT).node_port(KONG_PROXY_NODE_PORT),
                    PortSpec::new("admin", KONG_ADMIN_PORT).node_port(KONG_ADMIN_NODE_PORT),
                ],
                HealthCheck::tcp(KONG_PROXY_PORT, startup),
                None,
            )
        }
    };

    let storage = match (&settings.storage, mount_path) {
        (Some(size), Some(mount_path)) => Some(VolumeSpec {
            size: size.clone(),
            mount_path: mount_path.to_string(),
        }),
        _ => None,
    };

    Ok(ServiceDefinition {
        name,
        image: settings.image.clone(),
        depends_on,
        resources: ResourceTargets {
            memory: settings.memory.clone(),
            cpu: settings.cpu.clone(),
        },
        env,
        ports,
        health_check,
        storage,
        files,
        exposure,
    })
}
