//! `New`: validate the spec before any lookup happens

use kube::ResourceExt;
use tracing::debug;

use shardline_common::crd::{BackupState, ShardlineBackup};
use shardline_common::ReconcileError;

use crate::status::StatusUpdate;

pub(super) fn handle_new(backup: &ShardlineBackup) -> Result<StatusUpdate, ReconcileError> {
    if backup.spec.deployment.name.trim().is_empty() {
        return Err(ReconcileError::fatal("missing field spec.deployment.name"));
    }

    debug!(backup = %backup.name_any(), "Backup spec valid, waiting for backup");
    Ok(StatusUpdate::new()
        .state(BackupState::Pending)
        .available(false))
}
