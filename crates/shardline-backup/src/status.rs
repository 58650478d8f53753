//! Composable status updates for ShardlineBackup
//!
//! Handlers never write status themselves. They return a [`StatusUpdate`]: an
//! ordered list of field mutations that the controller applies onto the
//! current status and persists in a single write, so no reader ever sees a
//! new state next to a stale snapshot.

use chrono::{DateTime, Utc};

use shardline_common::crd::{BackupDetails, BackupMeta, BackupState, ShardlineBackupStatus};

/// One field change on a backup status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMutation {
    /// Set the lifecycle state and its message
    State {
        /// New state
        state: BackupState,
        /// Reason for the state, cleared when `None`
        message: Option<String>,
    },
    /// Set the availability flag
    Available(bool),
    /// Replace the observed snapshot, keeping the backup id
    Backup(BackupMeta),
}

/// Ordered set of mutations applied together
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    mutations: Vec<StatusMutation>,
}

impl StatusUpdate {
    /// An update that changes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to `state` and clear the message
    pub fn state(mut self, state: BackupState) -> Self {
        self.mutations.push(StatusMutation::State {
            state,
            message: None,
        });
        self
    }

    /// Transition to `state` with an explanatory message
    pub fn state_with_message(mut self, state: BackupState, message: impl Into<String>) -> Self {
        self.mutations.push(StatusMutation::State {
            state,
            message: Some(message.into()),
        });
        self
    }

    /// Set `available`
    pub fn available(mut self, available: bool) -> Self {
        self.mutations.push(StatusMutation::Available(available));
        self
    }

    /// Store a freshly observed snapshot
    pub fn backup(mut self, meta: BackupMeta) -> Self {
        self.mutations.push(StatusMutation::Backup(meta));
        self
    }

    /// True when applying the update cannot change anything
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// The mutations in application order
    pub fn mutations(&self) -> &[StatusMutation] {
        &self.mutations
    }

    /// Final state set by this update, if any
    pub fn target_state(&self) -> Option<BackupState> {
        self.mutations.iter().rev().find_map(|m| match m {
            StatusMutation::State { state, .. } => Some(*state),
            _ => None,
        })
    }

    /// Final availability set by this update, if any
    pub fn target_available(&self) -> Option<bool> {
        self.mutations.iter().rev().find_map(|m| match m {
            StatusMutation::Available(available) => Some(*available),
            _ => None,
        })
    }

    /// Apply onto `current`, stamping state changes with the current time
    pub fn apply(&self, current: &ShardlineBackupStatus) -> ShardlineBackupStatus {
        self.apply_at(current, Utc::now())
    }

    /// Apply onto `current`, stamping state changes with `now`
    pub fn apply_at(
        &self,
        current: &ShardlineBackupStatus,
        now: DateTime<Utc>,
    ) -> ShardlineBackupStatus {
        let mut status = current.clone();
        for mutation in &self.mutations {
            match mutation {
                StatusMutation::State { state, message } => {
                    if status.state != *state {
                        status.time = Some(now);
                    }
                    status.state = *state;
                    status.message = message.clone();
                }
                StatusMutation::Available(available) => status.available = *available,
                StatusMutation::Backup(meta) => match status.backup.as_mut() {
                    Some(details) => details.meta = meta.clone(),
                    None => {
                        status.backup = Some(BackupDetails {
                            id: String::new(),
                            meta: meta.clone(),
                        })
                    }
                },
            }
        }
        status
    }
}
