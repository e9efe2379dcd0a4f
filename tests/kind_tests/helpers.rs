//! Shared fixtures for the kind tests

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, Namespace, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use servicecreator::annotation::EXPOSE_ANNOTATION;
use servicecreator::config::ControllerConfig;
use servicecreator::controller::Controller;
use servicecreator::kube_utils::create_client;

static CRYPTO: Once = Once::new();

/// Connect to the cluster in the current kubeconfig context
pub async fn test_client() -> Client {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
    create_client(None)
        .await
        .expect("a reachable cluster is required for kind tests")
}

/// Create a fresh namespace for one test
pub async fn create_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &ns)
        .await
        .expect("failed to create test namespace");
}

/// Delete a test namespace, ignoring errors
pub async fn delete_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Handle to a controller running in the background
pub struct RunningController {
    shutdown: CancellationToken,
    handle: JoinHandle<servicecreator::Result<()>>,
}

impl RunningController {
    /// Stop the controller and wait for it to exit cleanly
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("controller task panicked")
            .expect("controller returned an error");
    }
}

/// Start a controller watching only `namespace`
pub fn start_controller(client: Client, namespace: &str, extra_excluded: &[&str]) -> RunningController {
    let config = ControllerConfig {
        watch_namespace: Some(namespace.to_string()),
        ..Default::default()
    }
    .exclude_namespaces(extra_excluded.iter().map(|ns| ns.to_string()));

    let shutdown = CancellationToken::new();
    let controller = Controller::new(client, config);
    let handle = tokio::spawn(controller.run(shutdown.clone()));
    RunningController { shutdown, handle }
}

/// A Deployment named `name` with optional exposure port
pub fn deployment(namespace: &str, name: &str, port: Option<&str>) -> Deployment {
    let pod_labels = BTreeMap::from([("app".to_string(), name.to_string())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("team".to_string(), "storefront".to_string())])),
            annotations: port
                .map(|p| BTreeMap::from([(EXPOSE_ANNOTATION.to_string(), p.to_string())])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some("nginx:alpine".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}
