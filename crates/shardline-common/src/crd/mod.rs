//! Custom Resource Definitions for Shardline

mod backup;
mod deployment;
mod types;

pub use backup::{
    BackupDeploymentRef, BackupDetails, BackupMeta, BackupState, ShardlineBackup,
    ShardlineBackupSpec, ShardlineBackupStatus,
};
pub use deployment::{
    MetricsSpec, ShardlineDeployment, ShardlineDeploymentSpec, ShardlineDeploymentStatus,
    TlsSpec, TLS_DISABLED,
};
pub use types::{Condition, ConditionStatus};
