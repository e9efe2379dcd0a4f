//! Reconciler worker
//!
//! A single pull loop that takes one intent at a time from the work queue and
//! drives the cluster toward it. Every item taken from the queue is handed
//! back with [`WorkQueue::done`] whatever the result.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::annotation::parse_port;
use crate::error::{is_already_exists, is_not_found};
use crate::intent::ExposureIntent;
use crate::queue::WorkQueue;
use crate::service::{build_service, ServiceClient};
use crate::{Error, Result};

/// What processing an intent did to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The Service was created or replaced
    Applied,
    /// The Service is gone (deleted now, or already absent)
    Deleted,
    /// Nothing to do; the namespace is excluded
    Skipped,
    /// The intent can never succeed and was discarded
    Dropped,
}

/// Applies exposure intents to the cluster
pub struct Reconciler {
    client: Arc<dyn ServiceClient>,
    excluded_namespaces: HashSet<String>,
    queue: WorkQueue,
}

impl Reconciler {
    /// Create a reconciler draining `queue`
    pub fn new(
        client: Arc<dyn ServiceClient>,
        excluded_namespaces: impl IntoIterator<Item = String>,
        queue: WorkQueue,
    ) -> Self {
        Self {
            client,
            excluded_namespaces: excluded_namespaces.into_iter().collect(),
            queue,
        }
    }

    /// Apply a single intent.
    ///
    /// Idempotent: a Sync that finds the Service already present replaces it,
    /// and a Delete that finds nothing counts as done.
    #[instrument(skip(self, intent), fields(key = %intent.key(), intent = intent.kind()))]
    pub async fn process(&self, intent: &ExposureIntent) -> Result<Outcome> {
        let key = intent.key();
        if self.excluded_namespaces.contains(&key.namespace) {
            debug!("Namespace excluded, skipping");
            return Ok(Outcome::Skipped);
        }

        match intent {
            ExposureIntent::Delete { key } => match self.client.delete(key).await {
                Ok(()) => {
                    info!("Deleted Service");
                    Ok(Outcome::Deleted)
                }
                Err(Error::Kube(e)) if is_not_found(&e) => {
                    debug!("Service already absent");
                    Ok(Outcome::Deleted)
                }
                Err(e) => Err(e),
            },
            ExposureIntent::Sync {
                key,
                labels,
                selector,
                port,
            } => {
                let port = parse_port(key, port)?;
                let service = build_service(key, labels, selector, port);

                match self.client.create(&service).await {
                    Ok(()) => {
                        info!(port, "Created Service");
                        Ok(Outcome::Applied)
                    }
                    Err(Error::Kube(e)) if is_already_exists(&e) => {
                        self.client.replace(&service).await?;
                        info!(port, "Replaced existing Service");
                        Ok(Outcome::Applied)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Take the next intent from the queue, apply it, and feed the result
    /// back to the queue.
    ///
    /// Returns `None` once the queue is shut down and drained. A retryable
    /// failure comes back as `Err` after the intent has been rescheduled.
    pub async fn process_next(&self) -> Option<Result<Outcome>> {
        let intent = self.queue.get().await?;
        let key = intent.key().clone();

        let result = match self.process(&intent).await {
            Ok(outcome) => {
                self.queue.forget(&key);
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    %key,
                    intent = intent.kind(),
                    error = %e,
                    retries = self.queue.num_requeues(&key),
                    "Failed to apply intent, requeueing with backoff"
                );
                self.queue.add_rate_limited(intent);
                Err(e)
            }
            Err(e) => {
                error!(%key, intent = intent.kind(), error = %e, "Dropping intent that cannot succeed");
                self.queue.forget(&key);
                Ok(Outcome::Dropped)
            }
        };

        self.queue.done(&key);
        Some(result)
    }

    /// Drain the queue until it shuts down
    pub async fn run(&self) {
        info!("Worker started");
        while self.process_next().await.is_some() {}
        info!("Worker stopped");
    }
}
