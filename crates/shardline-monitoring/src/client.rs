//! Collaborator clients for monitoring reconciliation
//!
//! Traits abstract the Kubernetes calls so the reconciler can be tested with
//! mocks while production uses `DynamicObject` access to the ServiceMonitor API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use shardline_common::crd::{ShardlineDeployment, ShardlineDeploymentStatus};
use shardline_common::kube_utils::{self, HasApiResource};
use shardline_common::{Error, CA_CERT_KEY};

use crate::service_monitor::ServiceMonitor;

/// Field manager used for writes made by the monitoring controller
pub const FIELD_MANAGER: &str = "shardline-monitoring-controller";

/// Bound on building a monitoring client, including kubeconfig inference
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// ServiceMonitor CRUD
///
/// `get` maps "not found" to `None`. `delete` reports a missing object as an
/// error like the API server does; the reconciler decides what a miss means.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringClient: Send + Sync {
    /// Get a ServiceMonitor by name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceMonitor>, Error>;

    /// Create a ServiceMonitor
    async fn create(&self, monitor: &ServiceMonitor) -> Result<(), Error>;

    /// Delete a ServiceMonitor by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Builds the backend handle behind [`MonitoringClient`]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringConnector: Send + Sync {
    /// Construct a new client
    async fn connect(&self) -> Result<Arc<dyn MonitoringClient>, Error>;
}

/// Reads CA certificates from stored secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CaSource: Send + Sync {
    /// Return the PEM-encoded CA certificate stored in the named secret
    async fn get_ca_cert(&self, namespace: &str, secret_name: &str) -> Result<Vec<u8>, Error>;
}

/// Writes ShardlineDeployment status
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentStatusClient: Send + Sync {
    /// Replace the status of a ShardlineDeployment
    async fn patch_deployment_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ShardlineDeploymentStatus,
    ) -> Result<(), Error>;
}

/// ServiceMonitor client backed by the Kubernetes API
pub struct KubeMonitoringClient {
    client: Client,
}

impl KubeMonitoringClient {
    /// Create a new KubeMonitoringClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &ServiceMonitor::api_resource(),
        )
    }
}

#[async_trait]
impl MonitoringClient for KubeMonitoringClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceMonitor>, Error> {
        let Some(obj) = self.api(namespace).get_opt(name).await? else {
            return Ok(None);
        };
        let value = serde_json::to_value(&obj).map_err(|e| {
            Error::serialization_for_kind(ServiceMonitor::KIND, e.to_string())
        })?;
        let monitor = serde_json::from_value(value).map_err(|e| {
            Error::serialization_for_kind(ServiceMonitor::KIND, e.to_string())
        })?;
        Ok(Some(monitor))
    }

    async fn create(&self, monitor: &ServiceMonitor) -> Result<(), Error> {
        let value = serde_json::to_value(monitor).map_err(|e| {
            Error::serialization_for_kind(ServiceMonitor::KIND, e.to_string())
        })?;
        let obj: DynamicObject = serde_json::from_value(value).map_err(|e| {
            Error::serialization_for_kind(ServiceMonitor::KIND, e.to_string())
        })?;
        self.api(&monitor.metadata.namespace)
            .create(
                &PostParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                &obj,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

/// Connector that builds a fresh kube client with bounded timeouts
pub struct KubeMonitoringConnector {
    kubeconfig: Option<PathBuf>,
}

impl KubeMonitoringConnector {
    /// Create a connector; `None` infers in-cluster configuration
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait]
impl MonitoringConnector for KubeMonitoringConnector {
    async fn connect(&self) -> Result<Arc<dyn MonitoringClient>, Error> {
        let client = kube_utils::with_deadline(
            "connect monitoring client",
            CONNECT_DEADLINE,
            kube_utils::create_client(self.kubeconfig.as_deref()),
        )
        .await?;
        debug!("created monitoring client");
        Ok(Arc::new(KubeMonitoringClient::new(client)))
    }
}

/// CA lookup backed by Kubernetes Secrets
pub struct KubeCaSource {
    client: Client,
}

impl KubeCaSource {
    /// Create a new KubeCaSource wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CaSource for KubeCaSource {
    async fn get_ca_cert(&self, namespace: &str, secret_name: &str) -> Result<Vec<u8>, Error> {
        kube_utils::get_secret_data(&self.client, secret_name, namespace, CA_CERT_KEY).await
    }
}

/// Deployment status writer backed by the Kubernetes API
pub struct KubeDeploymentStatusClient {
    client: Client,
}

impl KubeDeploymentStatusClient {
    /// Create a new KubeDeploymentStatusClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeploymentStatusClient for KubeDeploymentStatusClient {
    async fn patch_deployment_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ShardlineDeploymentStatus,
    ) -> Result<(), Error> {
        kube_utils::patch_resource_status::<ShardlineDeployment>(
            &self.client,
            name,
            namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }
}
