//! Collaborator clients for the backup state machine
//!
//! [`BackupClient`] is the database's view of a backup, [`BackupKubeClient`]
//! is the record store. Both are traits so handlers can be tested against
//! mocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{Client, ResourceExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use shardline_common::crd::{
    BackupMeta, ShardlineBackup, ShardlineBackupStatus, ShardlineDeployment,
};
use shardline_common::kube_utils;
use shardline_common::{Error, CA_CERT_KEY};

/// Field manager used for writes made by the backup controller
pub const FIELD_MANAGER: &str = "shardline-backup-controller";

/// Port the database coordinators serve their HTTP API on
pub const DATABASE_PORT: u16 = 8529;

/// Default per-request timeout for backup lookups
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

const BACKUP_LIST_PATH: &str = "/_admin/backup/list";

/// Why a backup lookup did not return a snapshot
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackupLookupError {
    /// The database has no backup with this id
    #[error("backup not found")]
    NotFound,

    /// The lookup itself failed
    #[error("backup lookup failed: {0}")]
    Other(String),
}

/// Read access to backups stored in the database
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupClient: Send + Sync {
    /// Fetch the current snapshot of a backup
    async fn get(&self, id: &str) -> Result<BackupMeta, BackupLookupError>;
}

/// Builds a [`BackupClient`] pointed at a deployment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupClientFactory: Send + Sync {
    /// Client for the given deployment's database
    async fn client_for(&self, deployment: &ShardlineDeployment)
        -> Result<Arc<dyn BackupClient>, Error>;
}

/// Kubernetes reads and writes needed by the backup controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupKubeClient: Send + Sync {
    /// Get a ShardlineDeployment by name
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ShardlineDeployment>, Error>;

    /// Replace the status of a ShardlineBackup
    async fn patch_backup_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ShardlineBackupStatus,
    ) -> Result<(), Error>;
}

/// Record store backed by the Kubernetes API
pub struct KubeBackupClient {
    client: Client,
}

impl KubeBackupClient {
    /// Create a new KubeBackupClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackupKubeClient for KubeBackupClient {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ShardlineDeployment>, Error> {
        let api: kube::Api<ShardlineDeployment> =
            kube::Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_backup_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ShardlineBackupStatus,
    ) -> Result<(), Error> {
        kube_utils::patch_resource_status::<ShardlineBackup>(
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

#[derive(Serialize)]
struct ListRequest<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: ListResult,
}

#[derive(Default, Deserialize)]
struct ListResult {
    #[serde(default)]
    list: HashMap<String, WireBackupMeta>,
}

/// Backup description as the database API reports it
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBackupMeta {
    #[serde(default)]
    available: bool,
    #[serde(default, rename = "nrDBServers")]
    nr_db_servers: u32,
    #[serde(default)]
    nr_pieces_present: u32,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    datetime: Option<DateTime<Utc>>,
}

impl From<WireBackupMeta> for BackupMeta {
    fn from(wire: WireBackupMeta) -> Self {
        Self {
            available: wire.available,
            number_of_db_servers: wire.nr_db_servers,
            number_of_pieces_present: wire.nr_pieces_present,
            version: wire.version,
            created_at: wire.datetime,
        }
    }
}

fn find_backup(id: &str, response: ListResponse) -> Result<BackupMeta, BackupLookupError> {
    let mut list = response.result.list;
    list.remove(id)
        .map(BackupMeta::from)
        .ok_or(BackupLookupError::NotFound)
}

/// Backup lookups over the database's HTTP API
pub struct HttpBackupClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackupClient {
    /// Create a client for the database served at `base_url`
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BackupClient for HttpBackupClient {
    async fn get(&self, id: &str) -> Result<BackupMeta, BackupLookupError> {
        let url = format!("{}{}", self.base_url, BACKUP_LIST_PATH);
        debug!(url = %url, backup_id = %id, "Looking up backup");

        let response = self
            .http
            .post(&url)
            .json(&ListRequest { id })
            .send()
            .await
            .map_err(|e| BackupLookupError::Other(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackupLookupError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupLookupError::Other(format!(
                "backup list returned {}: {}",
                status, body
            )));
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| BackupLookupError::Other(format!("invalid response: {}", e)))?;
        find_backup(id, body)
    }
}

/// Base URL of a deployment's database service
pub fn database_url(deployment: &ShardlineDeployment) -> String {
    let scheme = if deployment.spec.tls.is_secure() {
        "https"
    } else {
        "http"
    };
    format!(
        "{}://{}.{}.svc:{}",
        scheme,
        deployment.name_any(),
        deployment.namespace().unwrap_or_default(),
        DATABASE_PORT
    )
}

/// Builds [`HttpBackupClient`]s, trusting the deployment's CA when it serves TLS
pub struct HttpBackupClientFactory {
    kube: Client,
    timeout: Duration,
}

impl HttpBackupClientFactory {
    /// Create a factory reading CA secrets through `kube`
    pub fn new(kube: Client, timeout: Duration) -> Self {
        Self { kube, timeout }
    }
}

#[async_trait]
impl BackupClientFactory for HttpBackupClientFactory {
    async fn client_for(
        &self,
        deployment: &ShardlineDeployment,
    ) -> Result<Arc<dyn BackupClient>, Error> {
        let name = deployment.name_any();
        let namespace = deployment
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "deployment must be namespaced"))?;

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if deployment.spec.tls.is_secure() {
            let secret = deployment.spec.tls.ca_secret_name(&name);
            let pem = kube_utils::get_secret_data(&self.kube, &secret, &namespace, CA_CERT_KEY)
                .await?;
            let ca = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::internal_with_context(
                    "backup_client",
                    format!("invalid CA certificate in {}/{}: {}", namespace, secret, e),
                )
            })?;
            builder = builder.add_root_certificate(ca);
        }
        let http = builder.build().map_err(|e| {
            Error::internal_with_context(
                "backup_client",
                format!("failed to build HTTP client: {}", e),
            )
        })?;

        Ok(Arc::new(HttpBackupClient::new(http, database_url(deployment))))
    }
}
