//! Backup lifecycle state machine for ShardlineBackups
//!
//! Each reconcile advances a backup by at most one step: the handler for its
//! current state inspects the database once and returns a [`StatusUpdate`],
//! which the controller persists in a single status write.

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod handlers;
pub mod status;

pub use client::{
    BackupClient, BackupClientFactory, BackupKubeClient, BackupLookupError, HttpBackupClient,
    HttpBackupClientFactory, KubeBackupClient,
};
pub use controller::{error_policy, reconcile, BackupContext};
pub use handlers::advance;
pub use status::{StatusMutation, StatusUpdate};

/// Requeue interval while waiting for a backup to complete
pub const REQUEUE_POLL_SECS: u64 = 15;

/// Requeue interval for re-verifying a ready backup
pub const REQUEUE_READY_SECS: u64 = 60;

/// Requeue interval right after validation
pub const REQUEUE_NEW_SECS: u64 = 1;
