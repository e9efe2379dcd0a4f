//! Event classification
//!
//! Decides, for every Deployment notification, whether the derived Service
//! must be synced, deleted, or left alone. Decisions are pure functions of the
//! notification plus the process start time; [`EventClassifier`] wires them to
//! the work queue as an [`EventHandler`].

use chrono::{DateTime, SubsecRound, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, warn};

use crate::annotation::classify_annotation;
use crate::intent::{ExposureIntent, ObjectKey};
use crate::queue::WorkQueue;
use crate::watch::EventHandler;

/// Classifies Deployment notifications into exposure intents
pub struct EventClassifier {
    started_at: DateTime<Utc>,
    annotation_key: String,
    queue: WorkQueue,
}

impl EventClassifier {
    /// Create a classifier feeding `queue`.
    ///
    /// `started_at` is the process start time used for replay suppression.
    /// It is truncated to whole seconds, the precision of creation timestamps.
    pub fn new(
        queue: WorkQueue,
        annotation_key: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            started_at: started_at.trunc_subsecs(0),
            annotation_key: annotation_key.into(),
            queue,
        }
    }

    /// Process start time used for replay suppression
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Decide what an add notification means.
    ///
    /// Adds for Deployments created before this process started are the
    /// watch's initial list replaying existing objects and are ignored.
    pub fn classify_add(&self, deployment: &Deployment) -> Option<ExposureIntent> {
        let key = key_or_warn(deployment, "add")?;

        let Some(port) = classify_annotation(deployment, &self.annotation_key) else {
            debug!(%key, decision = "skip", "Annotation not present, no Service needed");
            return None;
        };

        let created = deployment
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0);
        if let Some(created) = created {
            if created < self.started_at {
                debug!(
                    %key,
                    decision = "skip",
                    created = %created,
                    started_at = %self.started_at,
                    "Deployment predates controller start, treating add as replay"
                );
                return None;
            }
        }

        info!(%key, decision = "sync", port = %port, "Deployment added with exposure annotation");
        Some(ExposureIntent::sync(key, deployment, port))
    }

    /// Decide what an update notification means
    pub fn classify_update(&self, old: &Deployment, new: &Deployment) -> Option<ExposureIntent> {
        if old.metadata.resource_version == new.metadata.resource_version {
            return None;
        }

        let key = key_or_warn(new, "update")?;
        let before = classify_annotation(old, &self.annotation_key);
        let after = classify_annotation(new, &self.annotation_key);

        match (before, after) {
            (Some(prev), Some(next)) if prev == next => {
                debug!(%key, decision = "skip", "Exposure annotation unchanged");
                None
            }
            (Some(_), None) => {
                info!(%key, decision = "delete", "Exposure annotation removed");
                Some(ExposureIntent::delete(key))
            }
            (None, None) => {
                debug!(%key, decision = "skip", "Annotation not present, no Service needed");
                None
            }
            (prev, Some(next)) => {
                info!(
                    %key,
                    decision = "sync",
                    previous = ?prev,
                    port = %next,
                    "Exposure annotation changed"
                );
                Some(ExposureIntent::sync(key, new, next))
            }
        }
    }

    /// Decide what a delete notification means
    pub fn classify_delete(&self, deployment: &Deployment) -> Option<ExposureIntent> {
        let key = key_or_warn(deployment, "delete")?;

        if classify_annotation(deployment, &self.annotation_key).is_none() {
            debug!(%key, decision = "skip", "Deleted Deployment had no Service to clean up");
            return None;
        }

        info!(%key, decision = "delete", "Exposed Deployment deleted");
        Some(ExposureIntent::delete(key))
    }
}

fn key_or_warn(deployment: &Deployment, notification: &str) -> Option<ObjectKey> {
    let key = ObjectKey::for_deployment(deployment);
    if key.is_none() {
        warn!(
            notification,
            name = ?deployment.metadata.name,
            namespace = ?deployment.metadata.namespace,
            "Ignoring malformed Deployment notification"
        );
    }
    key
}

impl EventHandler for EventClassifier {
    fn on_add(&self, deployment: &Deployment) {
        if let Some(intent) = self.classify_add(deployment) {
            self.queue.add(intent);
        }
    }

    fn on_update(&self, old: &Deployment, new: &Deployment) {
        if let Some(intent) = self.classify_update(old, new) {
            self.queue.add(intent);
        }
    }

    fn on_delete(&self, deployment: &Deployment) {
        if let Some(intent) = self.classify_delete(deployment) {
            self.queue.add(intent);
        }
    }
}
