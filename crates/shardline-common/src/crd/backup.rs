//! ShardlineBackup Custom Resource Definition
//!
//! A ShardlineBackup tracks one distributed backup of a ShardlineDeployment.
//! The backup is complete only when every DB server's piece is present; the
//! status records the last observed piece count so operators can see a partial
//! backup instead of a bare "unavailable".

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a ShardlineBackup
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupState {
    /// Freshly created, spec not yet validated
    #[default]
    New,
    /// Waiting for the backup to be registered and first verified
    Pending,
    /// Backup exists but is missing pieces or is not usable
    Unavailable,
    /// Every piece is present and the backup can be restored
    Ready,
    /// Backup no longer exists in the database
    Deleted,
    /// Backup cannot make progress until its spec changes
    Failed,
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Pending => write!(f, "Pending"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Ready => write!(f, "Ready"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Snapshot of a backup as reported by the database
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    /// Whether the database considers the backup usable
    #[serde(default)]
    pub available: bool,

    /// Number of DB servers the backup spans
    #[serde(default, rename = "numberOfDBServers")]
    pub number_of_db_servers: u32,

    /// Number of DB server pieces actually present
    #[serde(default)]
    pub number_of_pieces_present: u32,

    /// Database version that produced the backup
    #[serde(default)]
    pub version: Option<String>,

    /// When the backup was taken
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BackupMeta {
    /// Available and every DB server's piece is present
    pub fn is_complete(&self) -> bool {
        self.available && self.number_of_db_servers == self.number_of_pieces_present
    }
}

/// Identity plus last known snapshot of the backup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupDetails {
    /// Backup ID inside the database
    pub id: String,

    /// Last observed snapshot
    #[serde(flatten)]
    pub meta: BackupMeta,
}

/// Status of a ShardlineBackup
///
/// Unset fields serialize as `null` so a merge patch of the whole status
/// clears them on the server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardlineBackupStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: BackupState,

    /// Human-readable reason for the current state
    #[serde(default)]
    pub message: Option<String>,

    /// True only after a verified, complete lookup
    #[serde(default)]
    pub available: bool,

    /// Backup identity and last observed snapshot
    #[serde(default)]
    pub backup: Option<BackupDetails>,

    /// Last state transition
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,

    /// Spec generation at the last status write
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ShardlineBackupStatus {
    /// Create a status in the given state
    pub fn with_state(state: BackupState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Backup ID, if the start path has registered one
    pub fn backup_id(&self) -> Option<&str> {
        self.backup
            .as_ref()
            .map(|b| b.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Reference to the deployment a backup belongs to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupDeploymentRef {
    /// ShardlineDeployment name in the backup's namespace
    pub name: String,
}

/// Specification for a ShardlineBackup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.shardline.dev",
    version = "v1alpha1",
    kind = "ShardlineBackup",
    plural = "shardlinebackups",
    shortname = "slb",
    namespaced,
    status = "ShardlineBackupStatus",
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deployment.name"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Available","type":"boolean","jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShardlineBackupSpec {
    /// The deployment this backup was taken from
    pub deployment: BackupDeploymentRef,
}
