//! `Ready`: keep verifying that every piece is still present

use shardline_common::crd::ShardlineBackup;
use shardline_common::ReconcileError;

use super::observe_backup;
use crate::controller::BackupContext;
use crate::status::StatusUpdate;

pub(super) async fn handle_ready(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<StatusUpdate, ReconcileError> {
    observe_backup(backup, ctx).await
}
