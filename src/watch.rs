//! Deployment watch and local cache
//!
//! Turns the kube-rs watcher stream into edge-triggered add/update/delete
//! callbacks. The cache keeps the last seen copy of every Deployment so an
//! update can be delivered together with the object it replaces, and so a
//! re-list after a watch desync can report objects that vanished meanwhile.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use tokio::sync::watch as signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::intent::ObjectKey;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Receives typed Deployment notifications from the watch layer.
///
/// Implementations are called from the watch task, concurrently with the
/// worker, and must not block.
pub trait EventHandler: Send + Sync {
    /// A Deployment appeared (including the initial list replay)
    fn on_add(&self, deployment: &Deployment);

    /// A known Deployment changed
    fn on_update(&self, old: &Deployment, new: &Deployment);

    /// A Deployment was deleted; carries its last known state
    fn on_delete(&self, deployment: &Deployment);
}

/// Last seen state of every watched Deployment
#[derive(Default)]
pub struct DeploymentCache {
    objects: HashMap<ObjectKey, Deployment>,
    /// Keys seen during an in-progress (re-)list
    relist: Option<HashSet<ObjectKey>>,
    synced: bool,
}

impl DeploymentCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached Deployments
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cache holds no Deployments
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether the initial list has completed
    pub fn has_synced(&self) -> bool {
        self.synced
    }

    #[cfg(test)]
    fn get(&self, key: &ObjectKey) -> Option<&Deployment> {
        self.objects.get(key)
    }

    /// Apply one watcher event, dispatching the resulting notifications.
    ///
    /// Returns true when this event completed the very first list.
    pub fn apply(&mut self, event: Event<Deployment>, handler: &dyn EventHandler) -> bool {
        match event {
            Event::Init => {
                debug!("Deployment list started");
                self.relist = Some(HashSet::new());
                false
            }
            Event::InitApply(deployment) => {
                if let Some(key) = self.upsert(deployment, handler) {
                    if let Some(seen) = self.relist.as_mut() {
                        seen.insert(key);
                    }
                }
                false
            }
            Event::InitDone => {
                if let Some(seen) = self.relist.take() {
                    let vanished: Vec<ObjectKey> = self
                        .objects
                        .keys()
                        .filter(|key| !seen.contains(*key))
                        .cloned()
                        .collect();
                    for key in vanished {
                        if let Some(old) = self.objects.remove(&key) {
                            debug!(key = %key, "Deployment missing from re-list, treating as deleted");
                            handler.on_delete(&old);
                        }
                    }
                }
                let first_sync = !self.synced;
                self.synced = true;
                debug!(count = self.objects.len(), "Deployment list complete");
                first_sync
            }
            Event::Apply(deployment) => {
                self.upsert(deployment, handler);
                false
            }
            Event::Delete(deployment) => {
                match ObjectKey::for_deployment(&deployment) {
                    Some(key) => {
                        self.objects.remove(&key);
                        handler.on_delete(&deployment);
                    }
                    None => warn!(
                        name = ?deployment.metadata.name,
                        "Ignoring delete notification for Deployment without name or namespace"
                    ),
                }
                false
            }
        }
    }

    fn upsert(&mut self, deployment: Deployment, handler: &dyn EventHandler) -> Option<ObjectKey> {
        let Some(key) = ObjectKey::for_deployment(&deployment) else {
            warn!(
                name = ?deployment.metadata.name,
                "Ignoring Deployment without name or namespace"
            );
            return None;
        };

        match self.objects.insert(key.clone(), deployment) {
            Some(old) => {
                if let Some(new) = self.objects.get(&key) {
                    handler.on_update(&old, new);
                }
            }
            None => {
                if let Some(new) = self.objects.get(&key) {
                    handler.on_add(new);
                }
            }
        }
        Some(key)
    }
}

/// Gate that opens once the Deployment cache has completed its first list
#[derive(Clone)]
pub struct SyncGate {
    tx: Arc<signal::Sender<bool>>,
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncGate {
    /// Create a closed gate
    pub fn new() -> Self {
        let (tx, _rx) = signal::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate, releasing every waiter
    pub fn mark_synced(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the gate is open
    pub fn has_synced(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait for the gate to open.
    ///
    /// Returns false if `stop` fires first.
    pub async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            biased;
            synced = async { rx.wait_for(|synced| *synced).await.is_ok() } => synced,
            _ = stop.cancelled() => false,
        }
    }
}

/// Watch Deployments until `shutdown` fires, feeding the cache and handler.
pub async fn run_watch(
    api: Api<Deployment>,
    handler: Arc<dyn EventHandler>,
    gate: SyncGate,
    shutdown: CancellationToken,
) {
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let stream = watcher::watcher(api, config).default_backoff();
    let mut stream = std::pin::pin!(stream);
    let mut cache = DeploymentCache::new();

    info!("Deployment watch started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    if cache.apply(event, handler.as_ref()) {
                        info!(count = cache.len(), "Deployment cache synced");
                        gate.mark_synced();
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Deployment watch error, will retry");
                }
                None => {
                    warn!("Deployment watch stream ended");
                    break;
                }
            }
        }
    }

    info!("Deployment watch stopped");
}
