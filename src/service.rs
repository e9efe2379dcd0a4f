//! Managed Service construction and the Service API seam
//!
//! The worker talks to the cluster only through [`ServiceClient`], which keeps
//! the reconcile rules testable with a mock while production uses
//! [`KubeServiceClient`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::intent::ObjectKey;
use crate::Error;

/// Name of the single port on every managed Service
pub const SERVICE_PORT_NAME: &str = "http";

/// Label marking Services created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "servicecreator";

/// Build the Service derived from a Deployment.
///
/// Labels are the Deployment's labels plus the managed-by marker; the selector
/// is the Deployment's pod template labels.
pub fn build_service(
    key: &ObjectKey,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
    port: i32,
) -> Service {
    let mut labels = labels.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Trait abstracting the Service operations the worker needs
///
/// Errors are returned unclassified; callers use
/// [`crate::error::is_already_exists`] and [`crate::error::is_not_found`] on
/// the inner kube error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Create the Service
    async fn create(&self, service: &Service) -> Result<(), Error>;

    /// Replace an existing Service's spec and labels with the given ones
    async fn replace(&self, service: &Service) -> Result<(), Error>;

    /// Delete the Service identified by `key`
    async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeServiceClient {
    client: Client,
}

impl KubeServiceClient {
    /// Create a new KubeServiceClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(service: &Service) -> Result<&str, Error> {
    service
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::config("service has no namespace"))
}

fn name_of(service: &Service) -> Result<&str, Error> {
    service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::config("service has no name"))
}

#[async_trait]
impl ServiceClient for KubeServiceClient {
    async fn create(&self, service: &Service) -> Result<(), Error> {
        self.api(namespace_of(service)?)
            .create(&PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn replace(&self, service: &Service) -> Result<(), Error> {
        let name = name_of(service)?;
        let api = self.api(namespace_of(service)?);
        let live = api.get(name).await?;

        let mut desired = service.clone();
        // The live resourceVersion makes the replace conditional on what we just read
        desired.metadata.resource_version = live.metadata.resource_version.clone();
        // Allocated addresses are immutable; carry them over
        if let (Some(spec), Some(live_spec)) = (desired.spec.as_mut(), live.spec.as_ref()) {
            spec.cluster_ip = live_spec.cluster_ip.clone();
            spec.cluster_ips = live_spec.cluster_ips.clone();
        }

        debug!(service = %name, "Replacing Service");
        api.replace(name, &PostParams::default(), &desired).await?;
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        self.api(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
