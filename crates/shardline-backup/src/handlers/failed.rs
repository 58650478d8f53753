//! `Failed`: restart the lifecycle once the spec has been edited

use kube::ResourceExt;
use tracing::info;

use shardline_common::crd::{BackupState, ShardlineBackup};
use shardline_common::ReconcileError;

use crate::status::StatusUpdate;

pub(super) fn handle_failed(backup: &ShardlineBackup) -> Result<StatusUpdate, ReconcileError> {
    let observed = backup.status.as_ref().and_then(|s| s.observed_generation);
    if observed == backup.metadata.generation {
        return Ok(StatusUpdate::new());
    }

    info!(
        backup = %backup.name_any(),
        observed_generation = ?observed,
        generation = ?backup.metadata.generation,
        "Spec changed since failure, restarting"
    );
    Ok(StatusUpdate::new().state(BackupState::New).available(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures;

    #[test]
    fn unchanged_spec_stays_failed() {
        let backup = fixtures::backup(BackupState::Failed, Some("b1"));
        assert!(handle_failed(&backup).unwrap().is_empty());
    }

    #[test]
    fn edited_spec_restarts_at_new() {
        let mut backup = fixtures::backup(BackupState::Failed, Some("b1"));
        backup.metadata.generation = Some(2);
        let update = handle_failed(&backup).unwrap();
        assert_eq!(update.target_state(), Some(BackupState::New));
    }
}
