//! ShardlineDeployment Custom Resource Definition
//!
//! Only the parts of the deployment spec that the control-plane core reads are
//! modelled here: metrics exposure and the TLS CA reference. Pod and service
//! layout belong to other controllers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// CA secret name value that turns TLS off for a deployment
pub const TLS_DISABLED: &str = "None";

/// Metrics exporter configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// Expose metrics and register a ServiceMonitor (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl MetricsSpec {
    /// Whether metrics are enabled, treating an unset flag as disabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// TLS configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Secret holding the CA certificate (`ca.crt`).
    ///
    /// Defaults to `<deployment>-ca`. Set to `None` to disable TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret_name: Option<String>,
}

impl TlsSpec {
    /// Resolve the CA secret name for the given deployment
    pub fn ca_secret_name(&self, deployment_name: &str) -> String {
        self.ca_secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-ca", deployment_name))
    }

    /// Whether the deployment serves TLS
    pub fn is_secure(&self) -> bool {
        self.ca_secret_name.as_deref() != Some(TLS_DISABLED)
    }
}

/// Status of a ShardlineDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardlineDeploymentStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ShardlineDeploymentStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition with the same type
    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }
}

/// Specification for a ShardlineDeployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.shardline.dev",
    version = "v1alpha1",
    kind = "ShardlineDeployment",
    plural = "shardlinedeployments",
    shortname = "sld",
    namespaced,
    status = "ShardlineDeploymentStatus",
    printcolumn = r#"{"name":"Metrics","type":"boolean","jsonPath":".spec.metrics.enabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShardlineDeploymentSpec {
    /// Metrics exporter configuration
    #[serde(default)]
    pub metrics: MetricsSpec,

    /// TLS configuration
    #[serde(default)]
    pub tls: TlsSpec,
}
