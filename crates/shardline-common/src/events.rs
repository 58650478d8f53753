//! Kubernetes Event recording for Shardline controllers.
//!
//! Fatal reconcile failures are surfaced as Warning events so they show up in
//! `kubectl describe`. Events are fire-and-forget: a failed publish is logged
//! and never fails the reconcile that triggered it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as the given controller
    /// (e.g. "shardline-backup-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// ServiceMonitor created for a deployment
    pub const SERVICE_MONITOR_CREATED: &str = "ServiceMonitorCreated";
    /// ServiceMonitor removed after metrics were disabled
    pub const SERVICE_MONITOR_DELETED: &str = "ServiceMonitorDeleted";
    /// Monitoring reconcile hit a non-retryable failure
    pub const MONITORING_FAILED: &str = "MonitoringFailed";
    /// Backup verified complete
    pub const BACKUP_READY: &str = "BackupReady";
    /// Backup disappeared from the database
    pub const BACKUP_DELETED: &str = "BackupDeleted";
    /// Backup reconcile hit a non-retryable failure
    pub const BACKUP_FAILED: &str = "BackupFailed";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating an owned resource
    pub const CREATE: &str = "Create";
    /// Deleting an owned resource
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::BACKUP_FAILED,
                actions::RECONCILE,
                Some("missing field status.backup".to_string()),
            )
            .await;
    }
}
