//! `Unavailable`: poll until every DB server's piece is present
//!
//! The backup exists but the database either marks it unusable or reports
//! fewer pieces than DB servers. It becomes `Ready` only on a lookup that is
//! available with equal counts, and `Deleted` once the database forgets it.

use shardline_common::crd::ShardlineBackup;
use shardline_common::ReconcileError;

use super::observe_backup;
use crate::controller::BackupContext;
use crate::status::StatusUpdate;

pub(super) async fn handle_unavailable(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
) -> Result<StatusUpdate, ReconcileError> {
    observe_backup(backup, ctx).await
}
