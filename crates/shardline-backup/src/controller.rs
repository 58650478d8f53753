//! ShardlineBackup controller
//!
//! Runs one [`advance`] step per reconcile, persists the resulting status in a
//! single write and picks the requeue interval from the state it lands in.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use shardline_common::crd::{BackupState, ShardlineBackup, ShardlineBackupStatus};
use shardline_common::events::{actions, reasons, EventPublisher};
use shardline_common::{Error, ReconcileError, REQUEUE_ERROR_SECS};

use crate::client::{BackupClientFactory, BackupKubeClient};
use crate::handlers::advance;
use crate::status::StatusUpdate;
use crate::{REQUEUE_NEW_SECS, REQUEUE_POLL_SECS, REQUEUE_READY_SECS};

/// Default bound on a single state handler invocation
pub const DEFAULT_HANDLER_DEADLINE: Duration = Duration::from_secs(60);

/// Shared state for the backup controller
pub struct BackupContext {
    /// Record store
    pub kube: Arc<dyn BackupKubeClient>,
    /// Builds database clients per deployment
    pub factory: Arc<dyn BackupClientFactory>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Upper bound on one handler call
    pub deadline: Duration,
}

impl BackupContext {
    /// Create a context with the default handler deadline
    pub fn new(
        kube: Arc<dyn BackupKubeClient>,
        factory: Arc<dyn BackupClientFactory>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            factory,
            events,
            deadline: DEFAULT_HANDLER_DEADLINE,
        }
    }

    /// Override the handler deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Reconcile a ShardlineBackup by one lifecycle step
pub async fn reconcile(
    backup: Arc<ShardlineBackup>,
    ctx: Arc<BackupContext>,
) -> Result<Action, ReconcileError> {
    let name = backup.name_any();
    let namespace = backup
        .namespace()
        .ok_or_else(|| ReconcileError::fatal("backup must be namespaced"))?;
    let current = backup.status.clone().unwrap_or_default();

    info!(backup = %name, state = %current.state, "Reconciling ShardlineBackup");

    let outcome = match tokio::time::timeout(ctx.deadline, advance(&backup, &ctx)).await {
        Ok(result) => result,
        Err(_) => Err(ReconcileError::from(Error::timeout(
            format!("advance backup from {}", current.state),
            ctx.deadline,
        ))),
    };

    match outcome {
        Ok(update) => {
            let next = persist(&backup, &namespace, &ctx, &current, &update).await?;
            publish_transition(&backup, &ctx, current.state, &next).await;
            Ok(requeue_for(next.state))
        }
        Err(ReconcileError::Fatal(msg)) => {
            error!(backup = %name, error = %msg, "Backup reconcile failed");
            let update = StatusUpdate::new()
                .state_with_message(BackupState::Failed, msg.clone())
                .available(false);
            persist(&backup, &namespace, &ctx, &current, &update).await?;
            ctx.events
                .publish(
                    &backup.object_ref(&()),
                    EventType::Warning,
                    reasons::BACKUP_FAILED,
                    actions::RECONCILE,
                    Some(msg),
                )
                .await;
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Requeue interval for a backup sitting in `state`
pub fn requeue_for(state: BackupState) -> Action {
    match state {
        BackupState::New => Action::requeue(Duration::from_secs(REQUEUE_NEW_SECS)),
        BackupState::Pending | BackupState::Unavailable => {
            Action::requeue(Duration::from_secs(REQUEUE_POLL_SECS))
        }
        BackupState::Ready => Action::requeue(Duration::from_secs(REQUEUE_READY_SECS)),
        BackupState::Deleted | BackupState::Failed => Action::await_change(),
    }
}

/// Requeue temporary failures; fatal ones wait for the spec to change
pub fn error_policy(
    backup: Arc<ShardlineBackup>,
    error: &ReconcileError,
    _ctx: Arc<BackupContext>,
) -> Action {
    match error {
        ReconcileError::Fatal(_) => {
            error!(backup = %backup.name_any(), %error, "Backup reconcile failed");
            Action::await_change()
        }
        ReconcileError::Temporary(_) => {
            warn!(backup = %backup.name_any(), %error, "Backup reconcile failed, will retry");
            Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
        }
    }
}

/// Apply the update and write it unless nothing changed
async fn persist(
    backup: &ShardlineBackup,
    namespace: &str,
    ctx: &BackupContext,
    current: &ShardlineBackupStatus,
    update: &StatusUpdate,
) -> Result<ShardlineBackupStatus, ReconcileError> {
    let name = backup.name_any();
    let mut next = update.apply(current);
    next.observed_generation = backup.metadata.generation;

    if backup.status.as_ref() == Some(&next) {
        debug!(backup = %name, "status unchanged, skipping update");
        return Ok(next);
    }

    ctx.kube
        .patch_backup_status(namespace, &name, &next)
        .await
        .map_err(|e| ReconcileError::classify("failed to update backup status", e))?;
    debug!(backup = %name, state = %next.state, available = next.available, "status updated");
    Ok(next)
}

async fn publish_transition(
    backup: &ShardlineBackup,
    ctx: &BackupContext,
    previous: BackupState,
    next: &ShardlineBackupStatus,
) {
    if previous == next.state {
        return;
    }
    let (type_, reason) = match next.state {
        BackupState::Ready => (EventType::Normal, reasons::BACKUP_READY),
        BackupState::Deleted => (EventType::Warning, reasons::BACKUP_DELETED),
        _ => return,
    };
    ctx.events
        .publish(
            &backup.object_ref(&()),
            type_,
            reason,
            actions::RECONCILE,
            next.message.clone(),
        )
        .await;
}
