use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use supabase_stack::config::PartialConfig;
use supabase_stack::util::errors::ConfigError;
use supabase_stack::util::telemetry::LogFormat;

#[derive(Parser)]
#[command(name = "supabase-orchestrator")]
#[command(about = "Deploy a self-hosted Supabase stack to Kubernetes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Compact, global = true)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply all six services, tier by tier
    Deploy {
        #[command(flatten)]
        overrides: OverrideArgs,

        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Write Prometheus text exposition here after the run
        #[arg(long, value_name = "FILE")]
        metrics_file: Option<PathBuf>,
    },

    /// Delete the namespace and everything in it
    Destroy {
        #[command(flatten)]
        overrides: OverrideArgs,

        #[arg(long)]
        json: bool,
    },

    /// Print the manifests a deploy would apply
    Render {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(Args)]
pub struct OverrideArgs {
    /// Override one setting, e.g. `postgres.storage=50Gi` (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub set: Vec<(String, String)>,

    /// YAML file of overrides, applied before `--set`
    #[arg(long, value_name = "FILE")]
    pub overrides: Option<PathBuf>,

    /// Refuse placeholder and weak secrets instead of warning
    #[arg(long)]
    pub strict_secrets: bool,

    /// Size percentage targets from this node only
    #[arg(long)]
    pub host: Option<String>,
}

impl OverrideArgs {
    pub fn partial(&self) -> Result<PartialConfig, ConfigError> {
        let from_file = match &self.overrides {
            Some(path) => PartialConfig::from_file(path)?,
            None => PartialConfig::default(),
        };
        let pairs = self.set.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        let mut partial = from_file.merge(PartialConfig::from_pairs(pairs)?);
        if self.strict_secrets {
            partial.strict_secrets = Some(true);
        }
        Ok(partial)
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormatArg {
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_flags_become_overrides() {
        let cli = Cli::parse_from([
            "supabase-orchestrator",
            "deploy",
            "--set",
            "postgres.storage=50Gi",
            "--set",
            "namespace=supabase-dev",
            "--strict-secrets",
        ]);
        let Command::Deploy { overrides, .. } = cli.command else {
            panic!("expected deploy");
        };
        let partial = overrides.partial().unwrap();
        assert_eq!(partial.namespace.as_deref(), Some("supabase-dev"));
        assert_eq!(partial.strict_secrets, Some(true));
    }

    #[test]
    fn malformed_pair_is_rejected() {
        let parsed = Cli::try_parse_from(["supabase-orchestrator", "render", "--set", "namespace"]);
        assert!(parsed.is_err());
    }
}
