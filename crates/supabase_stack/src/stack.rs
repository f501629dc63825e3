//! The six services that make up one Supabase deployment unit and the
//! declarative description of each of them.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::secrets::SecretKey;
use crate::util::errors::ConfigError;
use crate::util::quantity::{ResourceAmount, StorageSize};

pub mod catalog;
pub mod kong;

pub use catalog::definitions;

/// Every Kubernetes object of the stack is labeled as part of this unit.
pub const PART_OF: &str = "supabase";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Postgres,
    Postgrest,
    Gotrue,
    Realtime,
    Storage,
    Kong,
}

impl ServiceName {
    pub const ALL: [ServiceName; 6] = [
        ServiceName::Postgres,
        ServiceName::Postgrest,
        ServiceName::Gotrue,
        ServiceName::Realtime,
        ServiceName::Storage,
        ServiceName::Kong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Postgres => "postgres",
            ServiceName::Postgrest => "postgrest",
            ServiceName::Gotrue => "gotrue",
            ServiceName::Realtime => "realtime",
            ServiceName::Storage => "storage",
            ServiceName::Kong => "kong",
        }
    }

    /// Prefix shared by every resource belonging to this service.
    pub fn resource_name(&self) -> String {
        format!("supabase-{}", self.as_str())
    }

    pub fn service_host(&self) -> String {
        format!("supabase-{}-service", self.as_str())
    }
}

// Ties in scheduling are broken by name, so ordering follows the name too.
impl Ord for ServiceName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for ServiceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownService(s.to_string()))
    }
}

/// One value per service, addressed by [`ServiceName`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct PerService<T> {
    pub postgres: T,
    pub postgrest: T,
    pub gotrue: T,
    pub realtime: T,
    pub storage: T,
    pub kong: T,
}

impl<T> PerService<T> {
    pub fn from_fn(mut f: impl FnMut(ServiceName) -> T) -> Self {
        PerService {
            postgres: f(ServiceName::Postgres),
            postgrest: f(ServiceName::Postgrest),
            gotrue: f(ServiceName::Gotrue),
            realtime: f(ServiceName::Realtime),
            storage: f(ServiceName::Storage),
            kong: f(ServiceName::Kong),
        }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(ServiceName) -> Result<T, E>) -> Result<Self, E> {
        Ok(PerService {
            postgres: f(ServiceName::Postgres)?,
            postgrest: f(ServiceName::Postgrest)?,
            gotrue: f(ServiceName::Gotrue)?,
            realtime: f(ServiceName::Realtime)?,
            storage: f(ServiceName::Storage)?,
            kong: f(ServiceName::Kong)?,
        })
    }

    pub fn get(&self, name: ServiceName) -> &T {
        match name {
            ServiceName::Postgres => &self.postgres,
            ServiceName::Postgrest => &self.postgrest,
            ServiceName::Gotrue => &self.gotrue,
            ServiceName::Realtime => &self.realtime,
            ServiceName::Storage => &self.storage,
            ServiceName::Kong => &self.kong,
        }
    }

    pub fn get_mut(&mut self, name: ServiceName) -> &mut T {
        match name {
            ServiceName::Postgres => &mut self.postgres,
            ServiceName::Postgrest => &mut self.postgrest,
            ServiceName::Gotrue => &mut self.gotrue,
            ServiceName::Realtime => &mut self.realtime,
            ServiceName::Storage => &mut self.storage,
            ServiceName::Kong => &mut self.kong,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceName, &T)> {
        ServiceName::ALL.into_iter().map(move |name| (name, self.get(name)))
    }
}

/// Value of one container environment variable.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvValue {
    /// Plain value, stored in the service ConfigMap.
    Literal(String),
    /// Reference into the shared `supabase-secrets` Secret.
    Secret(SecretKey),
    /// Inline value that may expand earlier variables with `$(NAME)`.
    Template(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProbeAction {
    TcpSocket { port: i32 },
    HttpGet { path: String, port: i32 },
}

/// Readiness signal of a service. Liveness is derived from it by loosening.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthCheck {
    pub action: ProbeAction,
    pub initial_delay: Duration,
    pub period: Duration,
    pub timeout: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl HealthCheck {
    pub fn tcp(port: i32, initial_delay: Duration) -> Self {
        HealthCheck {
            action: ProbeAction::TcpSocket { port },
            initial_delay,
            period: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
            success_threshold: 1,
            failure_threshold: 3,
        }
    }

    pub fn http(path: &str, port: i32, initial_delay: Duration) -> Self {
        HealthCheck {
            action: ProbeAction::HttpGet {
                path: path.to_string(),
                port,
            },
            ..HealthCheck::tcp(port, initial_delay)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub container_port: i32,
    pub node_port: Option<i32>,
}

impl PortSpec {
    pub fn new(name: &str, container_port: i32) -> Self {
        PortSpec {
            name: name.to_string(),
            container_port,
            node_port: None,
        }
    }

    pub fn node_port(mut self, node_port: i32) -> Self {
        self.node_port = Some(node_port);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceTargets {
    pub memory: ResourceAmount,
    pub cpu: ResourceAmount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeSpec {
    pub size: StorageSize,
    pub mount_path: String,
}

/// A file projected from the service's files ConfigMap into the container.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigFile {
    pub name: String,
    pub mount_path: String,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exposure {
    ClusterIp,
    NodePort,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceDefinition {
    pub name: ServiceName,
    pub image: String,
    pub depends_on: BTreeSet<ServiceName>,
    pub resources: ResourceTargets,
    pub env: Vec<(String, EnvValue)>,
    pub ports: Vec<PortSpec>,
    pub health_check: HealthCheck,
    pub storage: Option<VolumeSpec>,
    pub files: Vec<ConfigFile>,
    pub exposure: Exposure,
}
