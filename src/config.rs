//! Controller configuration

use std::time::Duration;

use crate::annotation::EXPOSE_ANNOTATION;
use crate::queue::ExponentialBackoff;
use crate::system_namespaces;

/// Default time allowed for the initial Deployment list
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Runtime settings for [`crate::controller::Controller`]
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Annotation whose presence exposes a Deployment; its value is the port
    pub annotation_key: String,
    /// Namespaces whose Deployments never get a managed Service
    pub excluded_namespaces: Vec<String>,
    /// Watch a single namespace instead of the whole cluster
    pub watch_namespace: Option<String>,
    /// Retry backoff for failed intents
    pub backoff: ExponentialBackoff,
    /// How long to wait for the initial Deployment list before giving up
    pub sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            annotation_key: EXPOSE_ANNOTATION.to_string(),
            excluded_namespaces: system_namespaces::all()
                .into_iter()
                .map(String::from)
                .collect(),
            watch_namespace: None,
            backoff: ExponentialBackoff::default(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    /// Add extra namespaces to the exclusion list, keeping it sorted and unique
    pub fn exclude_namespaces(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.excluded_namespaces.extend(extra);
        self.excluded_namespaces.sort();
        self.excluded_namespaces.dedup();
        self
    }
}
