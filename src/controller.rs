//! Controller wiring
//!
//! Owns the queue, classifier and reconciler, and runs the Deployment watch
//! and the single worker until shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classifier::EventClassifier;
use crate::config::ControllerConfig;
use crate::queue::WorkQueue;
use crate::service::{KubeServiceClient, ServiceClient};
use crate::watch::{run_watch, EventHandler, SyncGate};
use crate::worker::Reconciler;
use crate::{Error, Result};

/// The servicecreator controller
pub struct Controller {
    client: Client,
    config: ControllerConfig,
    queue: WorkQueue,
    classifier: Arc<EventClassifier>,
    reconciler: Reconciler,
    gate: SyncGate,
}

impl Controller {
    /// Build a controller that manages Services through `client`
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let services = Arc::new(KubeServiceClient::new(client.clone()));
        Self::with_service_client(client, services, config)
    }

    /// Build a controller with a custom Service client.
    ///
    /// `client` is still used for the Deployment watch.
    pub fn with_service_client(
        client: Client,
        services: Arc<dyn ServiceClient>,
        config: ControllerConfig,
    ) -> Self {
        let queue = WorkQueue::new(config.backoff.clone());
        let classifier = Arc::new(EventClassifier::new(
            queue.clone(),
            config.annotation_key.clone(),
            Utc::now(),
        ));
        let reconciler = Reconciler::new(
            services,
            config.excluded_namespaces.iter().cloned(),
            queue.clone(),
        );

        Self {
            client,
            config,
            queue,
            classifier,
            reconciler,
            gate: SyncGate::new(),
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Fails with [`Error::CacheSync`] if the initial Deployment list does not
    /// complete, in which case no intent is ever applied.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<Deployment> = match &self.config.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        info!(
            annotation = %self.config.annotation_key,
            namespace = ?self.config.watch_namespace,
            excluded = ?self.config.excluded_namespaces,
            started_at = %self.classifier.started_at(),
            "Starting servicecreator controller"
        );

        let watch_stop = shutdown.child_token();
        let handler: Arc<dyn EventHandler> = self.classifier.clone();
        let watch = tokio::spawn(run_watch(
            api,
            handler,
            self.gate.clone(),
            watch_stop.clone(),
        ));

        if let Err(e) = await_sync(&self.gate, &shutdown, self.config.sync_timeout).await {
            watch_stop.cancel();
            self.queue.shutdown();
            if let Err(join) = watch.await {
                warn!(error = %join, "Deployment watch task failed");
            }
            return Err(e);
        }

        info!("Deployment cache synced, starting worker");

        let queue = self.queue.clone();
        tokio::join!(self.reconciler.run(), async move {
            shutdown.cancelled().await;
            info!("Shutdown requested, draining work queue");
            queue.shutdown();
        });

        watch_stop.cancel();
        if let Err(e) = watch.await {
            warn!(error = %e, "Deployment watch task failed");
        }

        info!("Controller stopped");
        Ok(())
    }
}

/// Wait for the sync gate, giving up on shutdown or after `timeout`
async fn await_sync(gate: &SyncGate, shutdown: &CancellationToken, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, gate.wait_for_sync(shutdown)).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::cache_sync(
            "shutdown requested before the Deployment cache synced",
        )),
        Err(_) => Err(Error::cache_sync(format!(
            "Deployment cache did not sync within {}s",
            timeout.as_secs()
        ))),
    }
}
