//! Prometheus-operator ServiceMonitor resource types
//!
//! Only the fields Shardline sets are modelled. The ServiceMonitor CRD is
//! owned by prometheus-operator, so these are plain serde structs accessed
//! through `DynamicObject` rather than a `CustomResource` derive.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

use shardline_common::kube_utils::HasApiResource;

/// Port name the database exporter sidecar listens on
pub const EXPORTER_PORT_NAME: &str = "exporter";

/// Scrape interval for the exporter endpoint
pub const SCRAPE_INTERVAL: &str = "10s";

/// Label Prometheus uses as the job name
pub const JOB_LABEL: &str = "k8s-app";

/// prometheus-operator ServiceMonitor
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitor {
    /// API version
    #[serde(default = "ServiceMonitor::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "ServiceMonitor::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ServiceMonitorMeta,
    /// ServiceMonitor specification
    pub spec: ServiceMonitorSpec,
}

impl HasApiResource for ServiceMonitor {
    const API_VERSION: &'static str = "monitoring.coreos.com/v1";
    const KIND: &'static str = "ServiceMonitor";
}

impl ServiceMonitor {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new ServiceMonitor
    pub fn new(metadata: ServiceMonitorMeta, spec: ServiceMonitorSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Metadata of a ServiceMonitor
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default)]
    pub namespace: String,
    /// Labels used to discover the ServiceMonitor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Owner references for cascading deletion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

/// ServiceMonitor spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Label on the target Service used as the Prometheus job name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,
    /// Scrape endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Selects the Services to scrape
    #[serde(default)]
    pub selector: LabelSelector,
}

/// Label selector (matchLabels only)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels the target must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// One scrape endpoint
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Named port on the target Service
    pub port: String,
    /// Scrape interval
    pub interval: String,
    /// http or https
    pub scheme: String,
    /// TLS settings for https scraping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

/// Endpoint TLS settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// CA used to verify the target's certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<SecretOrConfigMap>,
    /// Skip certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Reference to a key in a Secret or ConfigMap
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretOrConfigMap {
    /// Secret key holding the data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeySelector>,
}

/// Selects a key of a Secret in the ServiceMonitor's namespace
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Data key
    pub key: String,
}
