//! Kong runs DB-less; its routes come from a declarative `kong.yml`.

use serde::Serialize;

use super::ServiceName;
use crate::util::errors::GraphError;

pub const CONFIG_FILE: &str = "kong.yml";
pub const CONFIG_PATH: &str = "/usr/local/kong/kong.yml";

#[derive(Serialize, Debug)]
pub struct DeclarativeConfig {
    #[serde(rename = "_format_version")]
    pub format_version: &'static str,
    #[serde(rename = "_transform")]
    pub transform: bool,
    pub services: Vec<KongService>,
    pub plugins: Vec<Plugin>,
}

#[derive(Serialize, Debug)]
pub struct KongService {
    pub name: String,
    pub url: String,
    pub routes: Vec<Route>,
}

#[derive(Serialize, Debug)]
pub struct Route {
    pub name: String,
    pub strip_path: bool,
    pub paths: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct Plugin {
    pub name: &'static str,
    pub config: CorsConfig,
}

#[derive(Serialize, Debug)]
pub struct CorsConfig {
    pub origins: Vec<&'static str>,
    pub methods: Vec<&'static str>,
    pub headers: Vec<&'static str>,
    pub exposed_headers: Vec<&'static str>,
    pub credentials: bool,
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            origins: vec!["*"],
            methods: vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"],
            headers: vec![
                "Accept",
                "Accept-Version",
                "Content-Length",
                "Content-MD5",
                "Content-Type",
                "Date",
                "X-Auth-Token",
                "Authorization",
                "apikey",
            ],
            exposed_headers: vec!["X-Auth-Token"],
            credentials: true,
            max_age: 3600,
        }
    }
}

/// Upstreams exposed through the gateway and the path prefix of each.
pub const ROUTES: [(ServiceName, &str, i32); 4] = [
    (ServiceName::Postgrest, "/rest/v1", 3000),
    (ServiceName::Gotrue, "/auth/v1", 9999),
    (ServiceName::Realtime, "/realtime/v1", 4000),
    (ServiceName::Storage, "/storage/v1", 5000),
];

impl DeclarativeConfig {
    pub fn for_stack() -> Self {
        let services = ROUTES
            .iter()
            .map(|(service, path, port)| KongService {
                name: service.to_string(),
                url: format!("http://{}:{port}", service.service_host()),
                routes: vec![Route {
                    name: format!("{service}-route"),
                    strip_path: true,
                    paths: vec![path.to_string()],
                }],
            })
            .collect();

        DeclarativeConfig {
            format_version: "3.0",
            transform: true,
            services,
            plugins: vec![Plugin {
                name: "cors",
                config: CorsConfig::default(),
            }],
        }
    }

    pub fn to_yaml(&self) -> Result<String, GraphError> {
        serde_yaml::to_string(self).map_err(GraphError::YamlSerializationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_every_api_service() {
        let yaml = DeclarativeConfig::for_stack().to_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed["_format_version"].as_str(), Some("3.0"));
        let services = parsed["services"].as_sequence().unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(
            services[0]["url"].as_str(),
            Some("http://supabase-postgrest-service:3000")
        );
        assert_eq!(services[1]["routes"][0]["paths"][0].as_str(), Some("/auth/v1"));
        assert_eq!(parsed["plugins"][0]["name"].as_str(), Some("cors"));
        assert_eq!(parsed["plugins"][0]["config"]["max_age"].as_u64(), Some(3600));
    }
}
