//! Controller runner - builds one controller future per watched CRD

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use shardline_backup::{BackupContext, HttpBackupClientFactory, KubeBackupClient};
use shardline_common::crd::{ShardlineBackup, ShardlineDeployment};
use shardline_common::events::KubeEventPublisher;
use shardline_monitoring::{
    KubeCaSource, KubeDeploymentStatusClient, KubeMonitoringConnector, MonitoringContext,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Scope of the watches
#[derive(Clone, Debug)]
pub struct WatchScope {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
}

impl WatchScope {
    fn api<K>(&self, client: Client) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

/// Build the ShardlineDeployment monitoring controller
pub fn build_monitoring_controller(
    client: Client,
    scope: &WatchScope,
    kubeconfig: Option<PathBuf>,
) -> ControllerFuture {
    let ctx = Arc::new(MonitoringContext::new(
        Arc::new(KubeMonitoringConnector::new(kubeconfig)),
        Arc::new(KubeCaSource::new(client.clone())),
        Arc::new(KubeDeploymentStatusClient::new(client.clone())),
        Arc::new(KubeEventPublisher::new(
            client.clone(),
            "shardline-monitoring-controller",
        )),
    ));
    let deployments: Api<ShardlineDeployment> = scope.api(client);

    Box::pin(
        Controller::new(
            deployments,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(
            shardline_monitoring::reconcile,
            shardline_monitoring::error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("Monitoring")),
    )
}

/// Build the ShardlineBackup lifecycle controller
pub fn build_backup_controller(
    client: Client,
    scope: &WatchScope,
    lookup_timeout: Duration,
) -> ControllerFuture {
    let ctx = Arc::new(BackupContext::new(
        Arc::new(KubeBackupClient::new(client.clone())),
        Arc::new(HttpBackupClientFactory::new(client.clone(), lookup_timeout)),
        Arc::new(KubeEventPublisher::new(
            client.clone(),
            "shardline-backup-controller",
        )),
    ));
    let backups: Api<ShardlineBackup> = scope.api(client);

    Box::pin(
        Controller::new(backups, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(
                shardline_backup::reconcile,
                shardline_backup::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("Backup")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
