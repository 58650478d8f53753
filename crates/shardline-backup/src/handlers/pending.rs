//! `Pending`: wait for the start path to register a backup id

use kube::ResourceExt;
use tracing::debug;

use shardline_common::crd::ShardlineBackup;
use shardline_common::ReconcileError;

use super::observe_backup;
use crate::controller::BackupContext;
use crate::status::StatusUpdate;

pub(super) async fn handle_pending(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<StatusUpdate, ReconcileError> {
    let registered = backup
        .status
        .as_ref()
        .and_then(|s| s.backup_id())
        .is_some();
    if !registered {
        debug!(backup = %backup.name_any(), "No backup id yet");
        return Ok(StatusUpdate::new());
    }

    observe_backup(backup, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BackupLookupError, MockBackupKubeClient};
    use crate::handlers::fixtures;
    use shardline_common::crd::BackupState;

    #[tokio::test]
    async fn unregistered_backup_waits_without_lookup() {
        let mut kube = MockBackupKubeClient::new();
        kube.expect_get_deployment().never();
        let ctx = fixtures::context(kube, fixtures::unused_factory());

        let update = handle_pending(&fixtures::backup(BackupState::Pending, None), &ctx)
            .await
            .unwrap();
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn complete_backup_becomes_ready() {
        let ctx = fixtures::context(
            fixtures::kube_with_deployment(),
            fixtures::factory_returning(Ok(fixtures::meta(true, 3, 3))),
        );

        let update = handle_pending(&fixtures::backup(BackupState::Pending, Some("b1")), &ctx)
            .await
            .unwrap();
        assert_eq!(update.target_state(), Some(BackupState::Ready));
        assert_eq!(update.target_available(), Some(true));
    }

    #[tokio::test]
    async fn vanished_backup_is_deleted() {
        let ctx = fixtures::context(
            fixtures::kube_with_deployment(),
            fixtures::factory_returning(Err(BackupLookupError::NotFound)),
        );

        let update = handle_pending(&fixtures::backup(BackupState::Pending, Some("b1")), &ctx)
            .await
            .unwrap();
        assert_eq!(update.target_state(), Some(BackupState::Deleted));
    }
}
