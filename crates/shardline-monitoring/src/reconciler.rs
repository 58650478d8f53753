//! ServiceMonitor reconciliation
//!
//! Makes the existence of a deployment's ServiceMonitor match
//! `spec.metrics.enabled`. The ServiceMonitor is never patched in place: if it
//! exists and metrics are wanted there is nothing to do, if it exists and
//! metrics are not wanted it is deleted, and if it is missing it is created
//! from the current intent. Re-running with an unchanged intent against a
//! correct cluster makes no mutating calls.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use shardline_common::crd::ShardlineDeployment;
use shardline_common::{Error, ReconcileError, APP_NAME, CA_CERT_KEY, LABEL_APP, LABEL_DEPLOYMENT};

use crate::client::{CaSource, MonitoringClient};
use crate::service_monitor::{
    Endpoint, LabelSelector, SecretKeySelector, SecretOrConfigMap, ServiceMonitor,
    ServiceMonitorMeta, ServiceMonitorSpec, TlsConfig, EXPORTER_PORT_NAME, JOB_LABEL,
    SCRAPE_INTERVAL,
};

/// Snapshot of what a deployment wants from monitoring
#[derive(Clone, Debug, PartialEq)]
pub struct MonitoringIntent {
    /// Deployment name
    pub deployment_name: String,
    /// Deployment namespace
    pub namespace: String,
    /// Controller owner reference pointing at the deployment
    pub owner: OwnerReference,
    /// Whether a ServiceMonitor should exist
    pub metrics_enabled: bool,
    /// Whether the exporter serves TLS
    pub secure: bool,
    /// Secret holding the CA certificate
    pub ca_secret_name: String,
}

impl MonitoringIntent {
    /// Build the intent from a ShardlineDeployment
    ///
    /// Fails if the object lacks the metadata needed to own a child resource.
    pub fn from_deployment(deployment: &ShardlineDeployment) -> Result<Self, ReconcileError> {
        let name = deployment.name_any();
        let namespace = deployment.namespace().ok_or_else(|| {
            ReconcileError::from(Error::validation_for_field(
                &name,
                "metadata.namespace",
                "deployment must be namespaced",
            ))
        })?;
        let owner = deployment.controller_owner_ref(&()).ok_or_else(|| {
            ReconcileError::from(Error::validation_for_field(
                &name,
                "metadata.uid",
                "deployment has no uid to own a ServiceMonitor",
            ))
        })?;

        Ok(Self {
            ca_secret_name: deployment.spec.tls.ca_secret_name(&name),
            secure: deployment.spec.tls.is_secure(),
            metrics_enabled: deployment.spec.metrics.is_enabled(),
            deployment_name: name,
            namespace,
            owner,
        })
    }

    /// Deterministic ServiceMonitor name for the deployment
    pub fn service_monitor_name(&self) -> String {
        service_monitor_name(&self.deployment_name)
    }
}

/// What a reconcile pass did to the ServiceMonitor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorAction {
    /// Observed state already matched the intent
    Unchanged,
    /// ServiceMonitor was created
    Created,
    /// ServiceMonitor was deleted (or was already gone)
    Deleted,
}

/// ServiceMonitor name for a deployment
pub fn service_monitor_name(deployment_name: &str) -> String {
    format!("{}-exporter", deployment_name)
}

/// Labels put on the ServiceMonitor itself
pub fn service_monitor_labels(deployment_name: &str) -> BTreeMap<String, String> {
    let mut labels = service_monitor_selector(deployment_name);
    labels.insert("context".to_string(), "metrics".to_string());
    labels
}

/// Labels the ServiceMonitor uses to select the deployment's exporter Service
pub fn service_monitor_selector(deployment_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DEPLOYMENT.to_string(), deployment_name.to_string()),
        (LABEL_APP.to_string(), APP_NAME.to_string()),
    ])
}

/// Bring the deployment's ServiceMonitor in line with the intent
pub async fn ensure_service_monitor(
    intent: &MonitoringIntent,
    monitoring: &dyn MonitoringClient,
    ca: &dyn CaSource,
) -> Result<MonitorAction, ReconcileError> {
    let name = intent.service_monitor_name();
    let namespace = intent.namespace.as_str();

    let existing = monitoring.get(namespace, &name).await.map_err(|e| {
        warn!(service_monitor = %name, error = %e, "Failed to get ServiceMonitor");
        ReconcileError::temporary(format!("failed to get ServiceMonitor {}: {}", name, e))
    })?;

    match existing {
        None if !intent.metrics_enabled => {
            debug!(service_monitor = %name, "metrics disabled and no ServiceMonitor present");
            Ok(MonitorAction::Unchanged)
        }
        None => {
            let endpoint = make_endpoint(intent, ca).await;
            let monitor = build_service_monitor(intent, endpoint);
            monitoring.create(&monitor).await.map_err(|e| {
                warn!(service_monitor = %name, error = %e, "Failed to create ServiceMonitor");
                let msg = format!("failed to create ServiceMonitor {}: {}", name, e);
                if e.is_rejected() {
                    ReconcileError::fatal(msg)
                } else {
                    ReconcileError::temporary(msg)
                }
            })?;
            info!(service_monitor = %name, "ServiceMonitor created");
            Ok(MonitorAction::Created)
        }
        Some(_) if intent.metrics_enabled => {
            debug!(service_monitor = %name, "ServiceMonitor already present");
            Ok(MonitorAction::Unchanged)
        }
        Some(_) => match monitoring.delete(namespace, &name).await {
            Ok(()) => {
                info!(service_monitor = %name, "ServiceMonitor deleted");
                Ok(MonitorAction::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(service_monitor = %name, "ServiceMonitor already gone");
                Ok(MonitorAction::Deleted)
            }
            Err(e) => {
                warn!(service_monitor = %name, error = %e, "Failed to delete ServiceMonitor");
                Err(ReconcileError::temporary(format!(
                    "failed to delete ServiceMonitor {}: {}",
                    name, e
                )))
            }
        },
    }
}

/// Build the scrape endpoint for the exporter
///
/// A secure deployment whose CA cannot be read still gets an https endpoint,
/// with verification disabled.
pub async fn make_endpoint(intent: &MonitoringIntent, ca: &dyn CaSource) -> Endpoint {
    if !intent.secure {
        return Endpoint {
            port: EXPORTER_PORT_NAME.to_string(),
            interval: SCRAPE_INTERVAL.to_string(),
            scheme: "http".to_string(),
            tls_config: None,
        };
    }

    let tls_config = match ca
        .get_ca_cert(&intent.namespace, &intent.ca_secret_name)
        .await
    {
        Ok(_) => TlsConfig {
            ca: Some(SecretOrConfigMap {
                secret: Some(SecretKeySelector {
                    name: intent.ca_secret_name.clone(),
                    key: CA_CERT_KEY.to_string(),
                }),
            }),
            insecure_skip_verify: false,
        },
        Err(e) => {
            warn!(
                deployment = %intent.deployment_name,
                secret = %intent.ca_secret_name,
                error = %e,
                "CA certificate unavailable, scraping without TLS verification"
            );
            TlsConfig {
                ca: None,
                insecure_skip_verify: true,
            }
        }
    };

    Endpoint {
        port: EXPORTER_PORT_NAME.to_string(),
        interval: SCRAPE_INTERVAL.to_string(),
        scheme: "https".to_string(),
        tls_config: Some(tls_config),
    }
}

/// Build the desired ServiceMonitor from the intent
pub fn build_service_monitor(intent: &MonitoringIntent, endpoint: Endpoint) -> ServiceMonitor {
    ServiceMonitor::new(
        ServiceMonitorMeta {
            name: intent.service_monitor_name(),
            namespace: intent.namespace.clone(),
            labels: service_monitor_labels(&intent.deployment_name),
            owner_references: vec![intent.owner.clone()],
        },
        ServiceMonitorSpec {
            job_label: Some(JOB_LABEL.to_string()),
            endpoints: vec![endpoint],
            selector: LabelSelector {
                match_labels: service_monitor_selector(&intent.deployment_name),
            },
        },
    )
}
