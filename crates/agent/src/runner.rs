//! Periodic reconciliation loop
//!
//! Runs [`ensure_buffer`] once at startup and then on every tick, feeding
//! the outcome into the health registry, metrics and structured log.

use buffer_lib::{
    ensure_buffer, BufferMetrics, BufferReport, ClusterClient, HealthRegistry, ReconcileContext,
    ReconcileError, ReconcileLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration for the reconcile loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Time between reconciliation passes (default: 60 seconds)
    pub interval: Duration,
    /// Deadline for each cluster call (default: 30 seconds)
    pub request_timeout: Duration,
    /// Consecutive failures before the reconciler reports unhealthy
    pub unhealthy_after: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            request_timeout: buffer_lib::context::DEFAULT_CALL_TIMEOUT,
            unhealthy_after: 3,
        }
    }
}

pub struct ReconcileLoop {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    config: LoopConfig,
    health: HealthRegistry,
    metrics: BufferMetrics,
    logger: ReconcileLogger,
    root: CancellationToken,
    consecutive_failures: u32,
}

impl ReconcileLoop {
    /// Run until `shutdown` fires
    ///
    /// A pass still in flight at shutdown is cancelled through its context
    /// and awaited before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            namespace = %self.namespace,
            interval_secs = self.config.interval.as_secs(),
            "Starting reconcile loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let root = self.root.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ctx = ReconcileContext::child_of(&root, self.config.request_timeout);
                    let pass = self.reconcile_once(&ctx);
                    tokio::pin!(pass);

                    tokio::select! {
                        _ = &mut pass => {}
                        _ = shutdown.recv() => {
                            root.cancel();
                            let _ = pass.await;
                            info!("Shutting down reconcile loop");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    root.cancel();
                    info!("Shutting down reconcile loop");
                    break;
                }
            }
        }
    }

    /// Run a single reconciliation pass and record its outcome
    pub async fn reconcile_once(
        &mut self,
        ctx: &ReconcileContext,
    ) -> Result<BufferReport, ReconcileError> {
        let start = Instant::now();
        let result = ensure_buffer(self.client.as_ref(), &self.namespace, ctx).await;
        let elapsed = start.elapsed().as_secs_f64();
        self.metrics.observe_reconcile_latency(elapsed);

        match &result {
            Ok(report) => {
                self.consecutive_failures = 0;
                self.metrics.record_report(report);
                self.logger.log_report(report, elapsed);
                self.health.record_success(report).await;
            }
            Err(err) => {
                self.metrics.record_failure(err);
                if err.is_cancelled() {
                    debug!(error = %err, "Reconciliation pass cancelled");
                } else {
                    self.consecutive_failures += 1;
                    self.logger
                        .log_reconcile_failed(err, self.consecutive_failures);
                }
                self.health
                    .record_failure(err, self.consecutive_failures, self.config.unhealthy_after)
                    .await;
            }
        }

        result
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Builder for creating the reconcile loop
pub struct ReconcileLoopBuilder {
    client: Option<Arc<dyn ClusterClient>>,
    namespace: Option<String>,
    config: LoopConfig,
    health: Option<HealthRegistry>,
    metrics: Option<BufferMetrics>,
    cancellation: Option<CancellationToken>,
}

impl Default for ReconcileLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            client: None,
            namespace: None,
            config: LoopConfig::default(),
            health: None,
            metrics: None,
            cancellation: None,
        }
    }

    pub fn client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the namespace the buffer deployment lives in
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn unhealthy_after(mut self, failures: u32) -> Self {
        self.config.unhealthy_after = failures;
        self
    }

    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: BufferMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parent token for every pass; cancelling it aborts the pass in flight
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Build the reconcile loop
    pub fn build(self) -> anyhow::Result<ReconcileLoop> {
        let client = self
            .client
            .ok_or_else(|| anyhow::anyhow!("Cluster client is required"))?;
        let namespace = self
            .namespace
            .ok_or_else(|| anyhow::anyhow!("Namespace is required"))?;
        if namespace.is_empty() {
            anyhow::bail!("Namespace must not be empty");
        }

        Ok(ReconcileLoop {
            client,
            logger: ReconcileLogger::new(&namespace),
            namespace,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            root: self.cancellation.unwrap_or_default(),
            consecutive_failures: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_lib::cluster::{node_fixture, FailurePoint, InMemoryCluster};
    use buffer_lib::health::{components, ComponentStatus};
    use buffer_lib::{Convergence, FailureKind};

    const NAMESPACE: &str = "toolchain-member-operator";

    fn cluster() -> InMemoryCluster {
        let worker = node_fixture("worker-0", &["worker"], Some("10Gi"));
        InMemoryCluster::with_nodes(vec![worker])
    }

    fn build(cluster: &InMemoryCluster, health: &HealthRegistry) -> ReconcileLoop {
        ReconcileLoopBuilder::new()
            .client(Arc::new(cluster.clone()))
            .namespace(NAMESPACE)
            .health_registry(health.clone())
            .interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    async fn status_of(health: &HealthRegistry, component: &str) -> ComponentStatus {
        health.health().await.components[component].status
    }

    #[test]
    fn test_builder_requires_client_and_namespace() {
        assert!(ReconcileLoopBuilder::new().namespace(NAMESPACE).build().is_err());
        assert!(ReconcileLoopBuilder::new()
            .client(Arc::new(cluster()))
            .build()
            .is_err());
        assert!(ReconcileLoopBuilder::new()
            .client(Arc::new(cluster()))
            .namespace("")
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_success_marks_ready() {
        let cluster = cluster();
        let health = HealthRegistry::new();
        let mut runner = build(&cluster, &health);

        let report = runner
            .reconcile_once(&ReconcileContext::default())
            .await
            .unwrap();

        assert_eq!(report.deployment, Convergence::Created);
        let readiness = health.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.size_gi, Some(report.size.size_gi));
        assert_eq!(
            status_of(&health, components::RECONCILER).await,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_sizing_failure_degrades_sizing() {
        let cluster = InMemoryCluster::new();
        let health = HealthRegistry::new();
        let mut runner = build(&cluster, &health);

        let err = runner
            .reconcile_once(&ReconcileContext::default())
            .await
            .unwrap_err();

        assert!(err.is_sizing());
        assert_eq!(
            status_of(&health, components::SIZING).await,
            ComponentStatus::Degraded
        );
        let readiness = health.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.last_failure, Some(FailureKind::Sizing));
    }

    #[tokio::test]
    async fn test_repeated_failures_turn_unhealthy_then_recover() {
        let cluster = cluster();
        cluster.fail_at(FailurePoint::PriorityClassGet);
        let health = HealthRegistry::new();
        let mut runner = build(&cluster, &health);
        let ctx = ReconcileContext::default();

        runner.reconcile_once(&ctx).await.unwrap_err();
        runner.reconcile_once(&ctx).await.unwrap_err();
        assert_eq!(
            status_of(&health, components::RECONCILER).await,
            ComponentStatus::Degraded
        );

        runner.reconcile_once(&ctx).await.unwrap_err();
        assert_eq!(runner.consecutive_failures(), 3);
        assert_eq!(
            status_of(&health, components::RECONCILER).await,
            ComponentStatus::Unhealthy
        );

        runner.client = Arc::new(self::cluster());
        runner.reconcile_once(&ctx).await.unwrap();
        assert_eq!(runner.consecutive_failures(), 0);
        assert_eq!(
            status_of(&health, components::RECONCILER).await,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_run_reconciles_until_shutdown() {
        let cluster = cluster();
        let health = HealthRegistry::new();
        let runner = build(&cluster, &health);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(runner.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(cluster.node_lists() >= 2);
        assert_eq!(cluster.writes(), 2);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pass_in_flight() {
        let cluster = cluster().with_latency(Duration::from_secs(5));
        let health = HealthRegistry::new();
        let token = CancellationToken::new();
        let runner = ReconcileLoopBuilder::new()
            .client(Arc::new(cluster.clone()))
            .namespace(NAMESPACE)
            .health_registry(health.clone())
            .cancellation(token.clone())
            .build()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(runner.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
        assert_eq!(cluster.writes(), 0);
        assert!(!health.readiness().await.ready);
    }
}
