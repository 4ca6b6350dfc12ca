//! Hands published discovery batches to the registry reconciler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use async_channel::{Receiver, Sender};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uascout_core::{DiscoveryResultModel, OperationContextModel};
use uascout_discovery::DiscoveryResultHandler;
use uascout_registry::DiscoveryReconciler;

/// Queue capacity of the forwarder, in batches
pub const FORWARDER_CAPACITY: usize = 16;

/// Result handler that queues each batch for reconciliation.
#[derive(Debug, Clone)]
pub struct ResultForwarder {
    tx: Sender<Vec<DiscoveryResultModel>>,
}

impl ResultForwarder {
    /// Creates the forwarder and spawns the task reconciling its batches on
    /// behalf of `discoverer_id`.
    ///
    /// The task ends once the forwarder is closed or every clone is dropped.
    pub fn spawn(
        discoverer_id: impl Into<String>,
        reconciler: Arc<DiscoveryReconciler>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = async_channel::bounded(FORWARDER_CAPACITY);
        let handle = tokio::spawn(reconcile_batches(discoverer_id.into(), reconciler, rx));
        (Self { tx }, handle)
    }

    /// Stops accepting batches. Queued batches are still reconciled.
    pub fn close(&self) {
        self.tx.close();
    }
}

#[async_trait]
impl DiscoveryResultHandler for ResultForwarder {
    async fn report_results(
        &self,
        results: Vec<DiscoveryResultModel>,
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(anyhow!("Publishing cancelled")),
            sent = self.tx.send(results) => {
                sent.map_err(|_| anyhow!("Reconciliation stopped"))
            }
        }
    }
}

async fn reconcile_batches(
    discoverer_id: String,
    reconciler: Arc<DiscoveryReconciler>,
    rx: Receiver<Vec<DiscoveryResultModel>>,
) {
    while let Ok(batch) = rx.recv().await {
        let context = batch
            .iter()
            .rev()
            .find_map(|r| r.result.as_ref().and_then(|info| info.context.clone()))
            .unwrap_or_else(OperationContextModel::now);
        debug!(records = batch.len(), "Reconciling discovery batch");

        if let Err(e) = reconciler
            .process_discovery_results(&discoverer_id, &context, &batch)
            .await
        {
            error!(discoverer_id = %discoverer_id, error = %e, "Failed to reconcile discovery results");
        }
    }
    info!("Reconciliation task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uascout_core::{
        ApplicationInfoModel, DiscoveryResultInfoModel, EndpointInfoModel,
    };
    use uascout_registry::InMemoryRepository;

    #[tokio::test]
    async fn test_forwarded_empty_batch_reaches_reconciler() {
        let applications = InMemoryRepository::<ApplicationInfoModel>::new();
        let endpoints = InMemoryRepository::<EndpointInfoModel>::new();
        let reconciler = Arc::new(DiscoveryReconciler::new(
            Arc::new(applications.clone()),
            Arc::new(endpoints.clone()),
        ));
        let (forwarder, task) = ResultForwarder::spawn("gw_module_discovery", reconciler);

        let sentinel =
            DiscoveryResultModel::sentinel(0, Utc::now(), DiscoveryResultInfoModel::default());
        forwarder
            .report_results(vec![sentinel], &CancellationToken::new())
            .await
            .unwrap();
        drop(forwarder);
        task.await.unwrap();
        assert!(applications.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_report_fails() {
        let reconciler = Arc::new(DiscoveryReconciler::new(
            Arc::new(InMemoryRepository::<ApplicationInfoModel>::new()),
            Arc::new(InMemoryRepository::<EndpointInfoModel>::new()),
        ));
        let (forwarder, _task) = ResultForwarder::spawn("gw_module_discovery", reconciler);
        let token = CancellationToken::new();
        token.cancel();

        let result = forwarder.report_results(Vec::new(), &token).await;
        assert!(result.is_err());
    }
}
