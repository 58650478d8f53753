//! ShardlineDeployment monitoring controller
//!
//! Wraps [`ensure_service_monitor`] for the kube-rs `Controller`: builds the
//! intent, hands out the cached monitoring client, records the outcome as a
//! `Monitoring` condition and maps the classified result to an [`Action`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use shardline_common::crd::{
    Condition, ConditionStatus, ShardlineDeployment, ShardlineDeploymentStatus,
};
use shardline_common::events::{actions, reasons, EventPublisher};
use shardline_common::{
    ClientCache, Error, ReconcileError, REQUEUE_ERROR_SECS, REQUEUE_SUCCESS_SECS,
};

use crate::client::{CaSource, DeploymentStatusClient, MonitoringClient, MonitoringConnector};
use crate::reconciler::{ensure_service_monitor, MonitorAction, MonitoringIntent};
use crate::service_monitor::ServiceMonitor;

/// Condition type recording the last monitoring reconcile
pub const MONITORING_CONDITION: &str = "Monitoring";

/// Default bound on a single monitoring reconcile
pub const DEFAULT_RECONCILE_DEADLINE: Duration = Duration::from_secs(60);

/// Shared state for the monitoring controller
pub struct MonitoringContext {
    /// Lazily built ServiceMonitor client
    pub monitoring: ClientCache<Arc<dyn MonitoringClient>>,
    /// Builds the monitoring client on first use or after invalidation
    pub connector: Arc<dyn MonitoringConnector>,
    /// CA certificate lookup
    pub ca: Arc<dyn CaSource>,
    /// Deployment status writer
    pub status: Arc<dyn DeploymentStatusClient>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Upper bound on one `ensure_service_monitor` call
    pub deadline: Duration,
}

impl MonitoringContext {
    /// Create a context with an empty client cache
    pub fn new(
        connector: Arc<dyn MonitoringConnector>,
        ca: Arc<dyn CaSource>,
        status: Arc<dyn DeploymentStatusClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            monitoring: ClientCache::new("monitoring"),
            connector,
            ca,
            status,
            events,
            deadline: DEFAULT_RECONCILE_DEADLINE,
        }
    }

    /// Override the reconcile deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Passes calls through and drops the cached client on 401/403, unless the
/// cache already holds a newer client
struct InvalidateOnAuthFailure<'a> {
    inner: Arc<dyn MonitoringClient>,
    cache: &'a ClientCache<Arc<dyn MonitoringClient>>,
}

impl InvalidateOnAuthFailure<'_> {
    async fn check<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        let auth_failed = match &result {
            Err(e) if e.is_auth_failure() => {
                warn!(error = %e, "monitoring API rejected credentials, dropping cached client");
                true
            }
            _ => false,
        };
        if auth_failed {
            self.cache
                .invalidate_if(|cached| Arc::ptr_eq(cached, &self.inner))
                .await;
        }
        result
    }
}

#[async_trait]
impl MonitoringClient for InvalidateOnAuthFailure<'_> {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMonitor>, Error> {
        let result = self.inner.get(namespace, name).await;
        self.check(result).await
    }

    async fn create(&self, monitor: &ServiceMonitor) -> Result<(), Error> {
        let result = self.inner.create(monitor).await;
        self.check(result).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let result = self.inner.delete(namespace, name).await;
        self.check(result).await
    }
}

/// Reconcile a ShardlineDeployment's ServiceMonitor
pub async fn reconcile(
    deployment: Arc<ShardlineDeployment>,
    ctx: Arc<MonitoringContext>,
) -> Result<Action, ReconcileError> {
    let name = deployment.name_any();
    info!(deployment = %name, "Reconciling ShardlineDeployment monitoring");

    let intent = match MonitoringIntent::from_deployment(&deployment) {
        Ok(intent) => intent,
        Err(e) => {
            error!(deployment = %name, error = %e, "Cannot build monitoring intent");
            publish_failure(&deployment, &ctx, e.message()).await;
            return Ok(Action::await_change());
        }
    };

    let client = ctx
        .monitoring
        .get_or_try_init(|| ctx.connector.connect())
        .await
        .map_err(|e| {
            ReconcileError::temporary(format!("failed to construct monitoring client: {}", e))
        })?;
    let client = InvalidateOnAuthFailure {
        inner: client,
        cache: &ctx.monitoring,
    };

    let outcome = match tokio::time::timeout(
        ctx.deadline,
        ensure_service_monitor(&intent, &client, ctx.ca.as_ref()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ReconcileError::from(Error::timeout(
            "ensure_service_monitor",
            ctx.deadline,
        ))),
    };

    match outcome {
        Ok(action) => {
            publish_action(&deployment, &ctx, &intent, action).await;
            let condition = if intent.metrics_enabled {
                Condition::new(
                    MONITORING_CONDITION,
                    ConditionStatus::True,
                    "ServiceMonitorReady",
                    format!("ServiceMonitor {} present", intent.service_monitor_name()),
                )
            } else {
                Condition::new(
                    MONITORING_CONDITION,
                    ConditionStatus::True,
                    "MetricsDisabled",
                    "metrics disabled, no ServiceMonitor",
                )
            };
            record_condition(&deployment, &intent.namespace, &ctx, condition).await?;
            Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
        }
        Err(ReconcileError::Fatal(msg)) => {
            error!(deployment = %name, error = %msg, "Monitoring reconcile failed");
            let condition = Condition::new(
                MONITORING_CONDITION,
                ConditionStatus::False,
                "Failed",
                msg.clone(),
            );
            record_condition(&deployment, &intent.namespace, &ctx, condition).await?;
            publish_failure(&deployment, &ctx, &msg).await;
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Requeue temporary failures; fatal ones wait for the spec to change
pub fn error_policy(
    deployment: Arc<ShardlineDeployment>,
    error: &ReconcileError,
    _ctx: Arc<MonitoringContext>,
) -> Action {
    match error {
        ReconcileError::Fatal(_) => {
            error!(deployment = %deployment.name_any(), %error, "Monitoring reconcile failed");
            Action::await_change()
        }
        ReconcileError::Temporary(_) => {
            warn!(
                deployment = %deployment.name_any(),
                %error,
                "Monitoring reconcile failed, will retry"
            );
            Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
        }
    }
}

/// Write the Monitoring condition unless the status already says the same thing
async fn record_condition(
    deployment: &ShardlineDeployment,
    namespace: &str,
    ctx: &MonitoringContext,
    condition: Condition,
) -> Result<(), ReconcileError> {
    let name = deployment.name_any();
    let current = deployment.status.clone().unwrap_or_default();
    let generation = deployment.metadata.generation;

    let unchanged = current
        .condition(MONITORING_CONDITION)
        .is_some_and(|c| c.same_as(&condition))
        && current.observed_generation == generation;
    if unchanged {
        debug!(deployment = %name, "monitoring condition unchanged, skipping status update");
        return Ok(());
    }

    let mut status: ShardlineDeploymentStatus = current;
    status.set_condition(condition);
    status.observed_generation = generation;

    ctx.status
        .patch_deployment_status(namespace, &name, &status)
        .await
        .map_err(|e| ReconcileError::classify("failed to update deployment status", e))
}

async fn publish_action(
    deployment: &ShardlineDeployment,
    ctx: &MonitoringContext,
    intent: &MonitoringIntent,
    action: MonitorAction,
) {
    let (reason, event_action) = match action {
        MonitorAction::Unchanged => return,
        MonitorAction::Created => (reasons::SERVICE_MONITOR_CREATED, actions::CREATE),
        MonitorAction::Deleted => (reasons::SERVICE_MONITOR_DELETED, actions::DELETE),
    };
    ctx.events
        .publish(
            &deployment.object_ref(&()),
            EventType::Normal,
            reason,
            event_action,
            Some(intent.service_monitor_name()),
        )
        .await;
}

async fn publish_failure(deployment: &ShardlineDeployment, ctx: &MonitoringContext, msg: &str) {
    ctx.events
        .publish(
            &deployment.object_ref(&()),
            EventType::Warning,
            reasons::MONITORING_FAILED,
            actions::RECONCILE,
            Some(msg.to_string()),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        MockCaSource, MockDeploymentStatusClient, MockMonitoringClient, MockMonitoringConnector,
    };
    use k8s_openapi::api::core::v1::ObjectReference;
    use kube::core::ObjectMeta;
    use shardline_common::crd::{MetricsSpec, ShardlineDeploymentSpec, TlsSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {}", code),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<(EventType, String)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.events.lock().unwrap().push((type_, reason.to_string()));
        }
    }

    fn sample_deployment(metrics: bool) -> Arc<ShardlineDeployment> {
        Arc::new(ShardlineDeployment {
            metadata: ObjectMeta {
                name: Some("orders".to_string()),
                namespace: Some("db".to_string()),
                uid: Some("orders-uid".to_string()),
                generation: Some(2),
                ..Default::default()
            },
            spec: ShardlineDeploymentSpec {
                metrics: MetricsSpec {
                    enabled: Some(metrics),
                },
                tls: TlsSpec {
                    ca_secret_name: Some("None".to_string()),
                },
            },
            status: None,
        })
    }

    fn connector_for(client: MockMonitoringClient) -> MockMonitoringConnector {
        let client: Arc<dyn MonitoringClient> = Arc::new(client);
        let mut connector = MockMonitoringConnector::new();
        connector
            .expect_connect()
            .returning(move || Ok(client.clone()));
        connector
    }

    fn context(
        connector: MockMonitoringConnector,
        status: MockDeploymentStatusClient,
        events: Arc<RecordingPublisher>,
    ) -> Arc<MonitoringContext> {
        let mut ca = MockCaSource::new();
        ca.expect_get_ca_cert().never();
        Arc::new(MonitoringContext::new(
            Arc::new(connector),
            Arc::new(ca),
            Arc::new(status),
            events,
        ))
    }

    #[tokio::test]
    async fn create_records_condition_and_requeues() {
        let mut client = MockMonitoringClient::new();
        client.expect_get().returning(|_, _| Ok(None));
        client.expect_create().times(1).returning(|_| Ok(()));

        let mut status = MockDeploymentStatusClient::new();
        status
            .expect_patch_deployment_status()
            .withf(|ns, name, s| {
                let c = s.condition(MONITORING_CONDITION).unwrap();
                ns == "db"
                    && name == "orders"
                    && c.status == ConditionStatus::True
                    && c.reason == "ServiceMonitorReady"
                    && s.observed_generation == Some(2)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(connector_for(client), status, events.clone());

        let action = reconcile(sample_deployment(true), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert_eq!(
            events.events.lock().unwrap().as_slice(),
            &[(EventType::Normal, reasons::SERVICE_MONITOR_CREATED.to_string())]
        );
    }

    #[tokio::test]
    async fn unchanged_condition_is_not_rewritten() {
        let mut client = MockMonitoringClient::new();
        client.expect_get().returning(|_, _| Ok(None));

        let mut status = MockDeploymentStatusClient::new();
        status.expect_patch_deployment_status().never();

        let mut deployment = (*sample_deployment(false)).clone();
        let mut current = ShardlineDeploymentStatus {
            observed_generation: Some(2),
            ..Default::default()
        };
        current.set_condition(Condition::new(
            MONITORING_CONDITION,
            ConditionStatus::True,
            "MetricsDisabled",
            "metrics disabled, no ServiceMonitor",
        ));
        deployment.status = Some(current);

        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(connector_for(client), status, events.clone());

        let action = reconcile(Arc::new(deployment), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert!(events.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_create_is_recorded_and_waits_for_change() {
        let mut client = MockMonitoringClient::new();
        client.expect_get().returning(|_, _| Ok(None));
        client.expect_create().returning(|_| Err(api_error(422)));

        let mut status = MockDeploymentStatusClient::new();
        status
            .expect_patch_deployment_status()
            .withf(|_, _, s| {
                let c = s.condition(MONITORING_CONDITION).unwrap();
                c.status == ConditionStatus::False && c.reason == "Failed"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(connector_for(client), status, events.clone());

        let action = reconcile(sample_deployment(true), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(
            events.events.lock().unwrap().as_slice(),
            &[(EventType::Warning, reasons::MONITORING_FAILED.to_string())]
        );
    }

    #[tokio::test]
    async fn temporary_failure_leaves_status_alone() {
        let mut client = MockMonitoringClient::new();
        client.expect_get().returning(|_, _| Err(api_error(503)));

        let mut status = MockDeploymentStatusClient::new();
        status.expect_patch_deployment_status().never();

        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(connector_for(client), status, events);

        let err = reconcile(sample_deployment(true), ctx).await.unwrap_err();
        assert!(err.is_temporary());
    }

    #[tokio::test]
    async fn connector_failure_is_temporary() {
        let mut connector = MockMonitoringConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|| Err(Error::internal_with_context("create_client", "no kubeconfig")));
        let mut status = MockDeploymentStatusClient::new();
        status.expect_patch_deployment_status().never();

        let ctx = context(connector, status, Arc::new(RecordingPublisher::default()));
        for _ in 0..2 {
            let err = reconcile(sample_deployment(true), ctx.clone())
                .await
                .unwrap_err();
            assert!(err.is_temporary());
        }
    }

    #[tokio::test]
    async fn auth_failure_invalidates_cached_client() {
        let connects = Arc::new(AtomicUsize::new(0));
        let mut connector = MockMonitoringConnector::new();
        let counter = connects.clone();
        connector.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut client = MockMonitoringClient::new();
            client.expect_get().returning(|_, _| Err(api_error(401)));
            Ok(Arc::new(client) as Arc<dyn MonitoringClient>)
        });
        let mut status = MockDeploymentStatusClient::new();
        status.expect_patch_deployment_status().never();

        let ctx = context(connector, status, Arc::new(RecordingPublisher::default()));

        let err = reconcile(sample_deployment(true), ctx.clone())
            .await
            .unwrap_err();
        assert!(err.is_temporary());

        reconcile(sample_deployment(true), ctx.clone())
            .await
            .unwrap_err();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn healthy_client_is_reused_across_reconciles() {
        let connects = Arc::new(AtomicUsize::new(0));
        let mut connector = MockMonitoringConnector::new();
        let counter = connects.clone();
        connector.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut client = MockMonitoringClient::new();
            client.expect_get().returning(|_, _| Err(api_error(500)));
            Ok(Arc::new(client) as Arc<dyn MonitoringClient>)
        });
        let ctx = context(
            connector,
            MockDeploymentStatusClient::new(),
            Arc::new(RecordingPublisher::default()),
        );

        for _ in 0..3 {
            reconcile(sample_deployment(true), ctx.clone())
                .await
                .unwrap_err();
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deployment_without_uid_waits_for_change() {
        let mut deployment = (*sample_deployment(true)).clone();
        deployment.metadata.uid = None;

        let mut connector = MockMonitoringConnector::new();
        connector.expect_connect().never();
        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(connector, MockDeploymentStatusClient::new(), events.clone());

        let action = reconcile(Arc::new(deployment), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(events.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn late_auth_failure_keeps_newer_client() {
        let ctx = context(
            MockMonitoringConnector::new(),
            MockDeploymentStatusClient::new(),
            Arc::new(RecordingPublisher::default()),
        );
        let fresh: Arc<dyn MonitoringClient> = Arc::new(MockMonitoringClient::new());
        let stale: Arc<dyn MonitoringClient> = Arc::new(MockMonitoringClient::new());
        let cached = fresh.clone();
        ctx.monitoring
            .get_or_try_init(|| async move { Ok::<_, Error>(cached) })
            .await
            .unwrap();

        let wrapper = InvalidateOnAuthFailure {
            inner: stale,
            cache: &ctx.monitoring,
        };
        let result: Result<(), Error> = wrapper.check(Err(api_error(401))).await;
        assert!(result.is_err());

        let current = ctx
            .monitoring
            .get_or_try_init(|| async { Err::<Arc<dyn MonitoringClient>, _>("reconnected") })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&current, &fresh));

        let wrapper = InvalidateOnAuthFailure {
            inner: fresh,
            cache: &ctx.monitoring,
        };
        let _ = wrapper.check::<()>(Err(api_error(403))).await;
        let rebuilt = ctx
            .monitoring
            .get_or_try_init(|| async { Err::<Arc<dyn MonitoringClient>, _>("reconnected") })
            .await;
        assert_eq!(rebuilt.err(), Some("reconnected"));
    }

    #[test]
    fn error_policy_requeues_only_temporary() {
        let ctx = context(
            MockMonitoringConnector::new(),
            MockDeploymentStatusClient::new(),
            Arc::new(RecordingPublisher::default()),
        );
        assert_eq!(
            error_policy(
                sample_deployment(true),
                &ReconcileError::temporary("timeout"),
                ctx.clone()
            ),
            Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
        );
        assert_eq!(
            error_policy(
                sample_deployment(true),
                &ReconcileError::fatal("rejected"),
                ctx
            ),
            Action::await_change()
        );
    }
}
