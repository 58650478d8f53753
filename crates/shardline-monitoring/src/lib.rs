//! ServiceMonitor reconciliation for ShardlineDeployments
//!
//! Keeps a prometheus-operator ServiceMonitor in existence exactly when a
//! deployment has `spec.metrics.enabled` set.

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod reconciler;
pub mod service_monitor;

pub use client::{
    CaSource, DeploymentStatusClient, KubeCaSource, KubeDeploymentStatusClient,
    KubeMonitoringClient, KubeMonitoringConnector, MonitoringClient, MonitoringConnector,
};
pub use controller::{error_policy, reconcile, MonitoringContext};
pub use reconciler::{ensure_service_monitor, MonitorAction, MonitoringIntent};
pub use service_monitor::ServiceMonitor;
