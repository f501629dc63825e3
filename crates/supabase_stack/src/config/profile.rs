use std::str::FromStr;

use serde::Serialize;

use super::overrides::PartialConfig;
use crate::util::errors::ConfigError;

/// Named preset applied beneath environment and explicit overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    Homelab,
    Production,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Homelab => "homelab",
            Profile::Production => "production",
        }
    }

    pub fn overrides(&self) -> PartialConfig {
        let mut preset = PartialConfig::default();
        let postgres = &mut preset.services.postgres;
        match self {
            Profile::Development => {
                postgres.storage = Some("5Gi".to_string());
                postgres.memory = Some("512Mi".to_string());
                preset.services.storage.storage = Some("10Gi".to_string());
            }
            Profile::Homelab => {
                postgres.storage = Some("20Gi".to_string());
                postgres.memory = Some("1Gi".to_string());
                preset.services.storage.storage = Some("50Gi".to_string());
            }
            Profile::Production => {
                postgres.storage = Some("50Gi".to_string());
                postgres.memory = Some("2Gi".to_string());
                postgres.cpu = Some("1000m".to_string());
                preset.services.storage.storage = Some("100Gi".to_string());
                preset.strict_secrets = Some(true);
            }
        }
        preset
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Profile::Development),
            "homelab" => Ok(Profile::Homelab),
            "production" => Ok(Profile::Production),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_is_strict() {
        let preset = Profile::Production.overrides();
        assert_eq!(preset.strict_secrets, Some(true));
        assert_eq!(preset.services.postgres.cpu.as_deref(), Some("1000m"));
        assert_eq!(Profile::Homelab.overrides().strict_secrets, None);
    }
}
