//! `Deleted`: terminal, the database no longer has the backup

use shardline_common::crd::ShardlineBackup;
use shardline_common::ReconcileError;

use crate::status::StatusUpdate;

pub(super) fn handle_deleted(_backup: &ShardlineBackup) -> Result<StatusUpdate, ReconcileError> {
    Ok(StatusUpdate::new())
}
