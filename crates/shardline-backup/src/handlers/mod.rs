//! Per-state handlers of the backup lifecycle
//!
//! [`advance`] dispatches on the persisted state with an exhaustive match, so
//! adding a state without a handler does not compile. Every handler returns a
//! [`StatusUpdate`] (possibly empty) or a classified error and performs at most
//! one database lookup.

mod deleted;
mod failed;
mod new;
mod pending;
mod ready;
mod unavailable;

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use shardline_common::crd::{BackupState, ShardlineBackup};
use shardline_common::ReconcileError;

use crate::client::{BackupClient, BackupLookupError};
use crate::controller::BackupContext;
use crate::status::StatusUpdate;

/// Compute the next status update for a backup from its current state
pub async fn advance(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<StatusUpdate, ReconcileError> {
    let state = backup
        .status
        .as_ref()
        .map(|s| s.state)
        .unwrap_or_default();

    match state {
        BackupState::New => new::handle_new(backup),
        BackupState::Pending => pending::handle_pending(backup, ctx).await,
        BackupState::Unavailable => unavailable::handle_unavailable(backup, ctx).await,
        BackupState::Ready => ready::handle_ready(backup, ctx).await,
        BackupState::Deleted => deleted::handle_deleted(backup),
        BackupState::Failed => failed::handle_failed(backup),
    }
}

/// Look the backup up in its deployment's database and map the result
///
/// | lookup | state | available |
/// |---|---|---|
/// | not found | Deleted | false |
/// | other error | unchanged | false |
/// | incomplete | Unavailable | false |
/// | complete | Ready | true |
pub(crate) async fn observe_backup(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<StatusUpdate, ReconcileError> {
    let name = backup.name_any();
    let client = backup_client(backup, ctx).await?;

    let id = backup
        .status
        .as_ref()
        .and_then(|s| s.backup_id())
        .ok_or_else(|| ReconcileError::fatal("missing field status.backup"))?;

    match client.get(id).await {
        Err(BackupLookupError::NotFound) => {
            warn!(backup = %name, backup_id = %id, "Backup no longer exists in the database");
            Ok(StatusUpdate::new()
                .state_with_message(BackupState::Deleted, "backup not found in database")
                .available(false))
        }
        Err(BackupLookupError::Other(msg)) => {
            warn!(backup = %name, backup_id = %id, error = %msg, "Backup lookup failed");
            Ok(StatusUpdate::new().available(false))
        }
        Ok(meta) if !meta.is_complete() => {
            debug!(
                backup = %name,
                available = meta.available,
                servers = meta.number_of_db_servers,
                pieces = meta.number_of_pieces_present,
                "Backup incomplete"
            );
            let message = format!(
                "{}/{} pieces present",
                meta.number_of_pieces_present, meta.number_of_db_servers
            );
            Ok(StatusUpdate::new()
                .state_with_message(BackupState::Unavailable, message)
                .backup(meta)
                .available(false))
        }
        Ok(meta) => Ok(StatusUpdate::new()
            .backup(meta)
            .state(BackupState::Ready)
            .available(true)),
    }
}

async fn backup_client(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<Arc<dyn BackupClient>, ReconcileError> {
    let deployment_name = &backup.spec.deployment.name;
    let namespace = backup
        .namespace()
        .ok_or_else(|| ReconcileError::temporary("backup has no namespace"))?;

    let deployment = ctx
        .kube
        .get_deployment(&namespace, deployment_name)
        .await
        .map_err(|e| {
            ReconcileError::temporary(format!(
                "failed to get deployment {}: {}",
                deployment_name, e
            ))
        })?
        .ok_or_else(|| {
            ReconcileError::temporary(format!("deployment {} not found", deployment_name))
        })?;

    ctx.factory.client_for(&deployment).await.map_err(|e| {
        ReconcileError::temporary(format!(
            "failed to create backup client for {}: {}",
            deployment_name, e
        ))
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use kube::core::ObjectMeta;
    use shardline_common::crd::{
        BackupDeploymentRef, BackupDetails, BackupMeta, BackupState, ShardlineBackup,
        ShardlineBackupSpec, ShardlineBackupStatus, ShardlineDeployment, ShardlineDeploymentSpec,
    };
    use shardline_common::events::NoopEventPublisher;

    use crate::client::{
        BackupClient, BackupLookupError, MockBackupClient, MockBackupClientFactory,
        MockBackupKubeClient,
    };
    use crate::controller::BackupContext;

    pub fn meta(available: bool, servers: u32, pieces: u32) -> BackupMeta {
        BackupMeta {
            available,
            number_of_db_servers: servers,
            number_of_pieces_present: pieces,
            ..Default::default()
        }
    }

    pub fn backup(state: BackupState, id: Option<&str>) -> ShardlineBackup {
        ShardlineBackup {
            metadata: ObjectMeta {
                name: Some("nightly".to_string()),
                namespace: Some("db".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: ShardlineBackupSpec {
                deployment: BackupDeploymentRef {
                    name: "orders".to_string(),
                },
            },
            status: Some(ShardlineBackupStatus {
                state,
                backup: id.map(|id| BackupDetails {
                    id: id.to_string(),
                    meta: meta(true, 3, 3),
                }),
                observed_generation: Some(1),
                ..Default::default()
            }),
        }
    }

    pub fn deployment() -> ShardlineDeployment {
        ShardlineDeployment {
            metadata: ObjectMeta {
                name: Some("orders".to_string()),
                namespace: Some("db".to_string()),
                ..Default::default()
            },
            spec: ShardlineDeploymentSpec::default(),
            status: None,
        }
    }

    /// Record store that only knows the `orders` deployment
    pub fn kube_with_deployment() -> MockBackupKubeClient {
        let mut kube = MockBackupKubeClient::new();
        kube.expect_get_deployment()
            .returning(|_, name| Ok((name == "orders").then(deployment)));
        kube
    }

    /// Factory handing out a client whose single lookup returns `result`
    pub fn factory_returning(
        result: Result<BackupMeta, BackupLookupError>,
    ) -> MockBackupClientFactory {
        let mut client = MockBackupClient::new();
        client.expect_get().times(1).return_const(result);
        factory_with(client)
    }

    pub fn factory_with(client: MockBackupClient) -> MockBackupClientFactory {
        let client: Arc<dyn BackupClient> = Arc::new(client);
        let mut factory = MockBackupClientFactory::new();
        factory
            .expect_client_for()
            .returning(move |_| Ok(client.clone()));
        factory
    }

    /// Factory that must not be asked for a client
    pub fn unused_factory() -> MockBackupClientFactory {
        let mut factory = MockBackupClientFactory::new();
        factory.expect_client_for().never();
        factory
    }

    pub fn context(kube: MockBackupKubeClient, factory: MockBackupClientFactory) -> BackupContext {
        BackupContext::new(
            Arc::new(kube),
            Arc::new(factory),
            Arc::new(NoopEventPublisher),
        )
    }
}
