//! Shardline operator - ServiceMonitor and backup lifecycle controllers

mod controller_runner;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

use shardline_backup::client::DEFAULT_LOOKUP_TIMEOUT;
use shardline_common::crd::{ShardlineBackup, ShardlineDeployment};
use shardline_common::kube_utils;
use shardline_common::telemetry::{init_telemetry, TelemetryConfig};

use controller_runner::WatchScope;

/// Shardline - Kubernetes operator core for a clustered database
#[derive(Parser, Debug)]
#[command(name = "shardline", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Path to a kubeconfig file; in-cluster configuration is inferred when unset
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "SHARDLINE_WATCH_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Timeout for a single backup lookup against the database
    #[arg(
        long,
        env = "SHARDLINE_BACKUP_TIMEOUT_SECS",
        default_value_t = DEFAULT_LOOKUP_TIMEOUT.as_secs(),
        global = true
    )]
    backup_timeout_secs: u64,

    /// Log human-readable lines instead of JSON
    #[arg(long, env = "SHARDLINE_PLAIN_LOGS", global = true)]
    plain_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitoring and backup controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [ShardlineDeployment::crd(), ShardlineBackup::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.plain_logs,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controllers(&cli).await,
    }
}

async fn run_controllers(cli: &Cli) -> anyhow::Result<()> {
    let client = kube_utils::create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let scope = WatchScope {
        namespace: cli.namespace.clone(),
    };
    match &scope.namespace {
        Some(ns) => tracing::info!(namespace = %ns, "Watching a single namespace"),
        None => tracing::info!("Watching all namespaces"),
    }

    let controllers = vec![
        controller_runner::build_monitoring_controller(
            client.clone(),
            &scope,
            cli.kubeconfig.clone(),
        ),
        controller_runner::build_backup_controller(
            client,
            &scope,
            Duration::from_secs(cli.backup_timeout_secs),
        ),
    ];

    tracing::info!("Shardline controllers started");
    futures::future::join_all(controllers).await;
    tracing::info!("Shardline controllers stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["shardline"]).unwrap();
        assert!(!cli.crd);
        assert_eq!(cli.backup_timeout_secs, 30);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_controller_with_flags() {
        let cli = Cli::try_parse_from([
            "shardline",
            "controller",
            "--namespace",
            "db",
            "--backup-timeout-secs",
            "5",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Controller)));
        assert_eq!(cli.namespace.as_deref(), Some("db"));
        assert_eq!(cli.backup_timeout_secs, 5);
    }

    #[test]
    fn crds_render_as_yaml() {
        let yaml = serde_yaml::to_string(&ShardlineBackup::crd()).unwrap();
        assert!(yaml.contains("shardlinebackups.database.shardline.dev"));
        let yaml = serde_yaml::to_string(&ShardlineDeployment::crd()).unwrap();
        assert!(yaml.contains("shardlinedeployments.database.shardline.dev"));
    }
}
