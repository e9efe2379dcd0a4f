//! Exposure intents: the unit of work produced by the classifier and
//! consumed by the worker.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;

/// Namespaced identity shared by a Deployment and its managed Service
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a Deployment, or `None` if it lacks a name or namespace
    pub fn for_deployment(deployment: &Deployment) -> Option<Self> {
        let name = deployment.metadata.name.as_deref()?;
        let namespace = deployment.metadata.namespace.as_deref()?;
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the worker should do about the Service derived from a Deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExposureIntent {
    /// Create or replace the Service so it matches this spec
    Sync {
        /// Identity of the Deployment and the Service
        key: ObjectKey,
        /// Labels copied from the Deployment
        labels: BTreeMap<String, String>,
        /// Pod template labels, used as the Service selector
        selector: BTreeMap<String, String>,
        /// Raw annotation value; parsed into a port number at apply time
        port: String,
    },
    /// The Service should no longer exist
    Delete {
        /// Identity of the Deployment and the Service
        key: ObjectKey,
    },
}

impl ExposureIntent {
    /// Build a `Sync` intent from a snapshot of the Deployment
    pub fn sync(key: ObjectKey, deployment: &Deployment, port: impl Into<String>) -> Self {
        let labels = deployment.metadata.labels.clone().unwrap_or_default();
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.clone())
            .unwrap_or_default();

        Self::Sync {
            key,
            labels,
            selector,
            port: port.into(),
        }
    }

    /// Build a `Delete` intent
    pub fn delete(key: ObjectKey) -> Self {
        Self::Delete { key }
    }

    /// Queue identity of this intent
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Sync { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Delete { .. } => "delete",
        }
    }
}
