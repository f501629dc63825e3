use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use supabase_stack::applier::KubeApplier;
use supabase_stack::config::{self, Environment, PartialConfig};
use supabase_stack::hardware::NodeFacts;
use supabase_stack::util::metrics::Metrics;
use supabase_stack::util::telemetry;
use supabase_stack::Orchestrator;
use tokio::sync::watch;
use tracing::warn;

mod cli;
mod output;

use cli::{Cli, Command, OverrideArgs};

/// Client from the `KUBECONFIG` files in order, or the usual inference.
async fn client(kubeconfig: &[PathBuf]) -> anyhow::Result<Client> {
    let config = match kubeconfig.split_first() {
        None => Config::infer().await.context("inferring kube config")?,
        Some((first, rest)) => {
            let mut merged = Kubeconfig::read_from(first)
                .with_context(|| format!("reading {}", first.display()))?;
            for path in rest {
                let next = Kubeconfig::read_from(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                merged = merged.merge(next)?;
            }
            Config::from_custom_kubeconfig(merged, &KubeConfigOptions::default()).await?
        }
    };
    Ok(Client::try_from(config)?)
}

async fn orchestrator(
    args: &OverrideArgs,
    environment: Environment,
) -> anyhow::Result<(Orchestrator, PartialConfig, config::DeploymentConfig)> {
    let overrides = args.partial()?;
    let resolved = config::resolve(overrides.clone(), &environment)?;
    let client = client(&resolved.kubeconfig).await?;

    let mut orchestrator = Orchestrator::new(
        Arc::new(KubeApplier::new(client.clone())),
        Arc::new(NodeFacts::new(client)),
        environment,
    );
    if let Some(host) = &args.host {
        orchestrator = orchestrator.with_host(host);
    }
    Ok((orchestrator, overrides, resolved))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format.into());
    let environment = Environment::from_process();

    match cli.command {
        Command::Deploy {
            overrides,
            json,
            metrics_file,
        } => {
            let (orchestrator, overrides, _) = orchestrator(&overrides, environment).await?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, no further tiers will be started");
                    let _ = cancel_tx.send(true);
                }
            });
            let orchestrator = orchestrator
                .with_cancellation(cancel_rx)
                .with_metrics(Metrics::default().register()?);

            let result = orchestrator.deploy(overrides).await?;
            if let Some(path) = metrics_file {
                std::fs::write(&path, orchestrator.metrics().encode()?)
                    .with_context(|| format!("writing {}", path.display()))?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", output::deployment_table(&result));
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Destroy { overrides, json } => {
            let (orchestrator, _, resolved) = orchestrator(&overrides, environment).await?;
            let result = orchestrator.destroy(&resolved.namespace).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", output::destroy_line(&result));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Render { overrides } => {
            let (orchestrator, overrides, _) = orchestrator(&overrides, environment).await?;
            print!("{}", orchestrator.render(overrides).await?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
