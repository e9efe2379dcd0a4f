//! Integration tests for Deployment exposure
//!
//! These tests tell the story of a developer who exposes a Deployment by
//! annotating it, changes the port, and later takes the Service away.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use servicecreator::annotation::EXPOSE_ANNOTATION;
use servicecreator::service::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_PORT_NAME};

use super::helpers::{
    create_namespace, delete_namespace, deployment, eventually, start_controller, test_client,
};

const TIMEOUT: Duration = Duration::from_secs(30);

async fn service_port(api: &Api<Service>, name: &str) -> Option<i32> {
    let svc = api.get_opt(name).await.ok()??;
    svc.spec?.ports?.first().map(|p| p.port)
}

async fn service_gone(api: &Api<Service>, name: &str) -> bool {
    matches!(api.get_opt(name).await, Ok(None))
}

/// Give the controller time to finish its initial list, so new Deployments
/// are not mistaken for the replay of existing ones
async fn settle() {
    tokio::time::sleep(Duration::from_secs(2)).await;
}

/// Story: a developer exposes `web` on 8080, moves it to 9090, then removes
/// the annotation
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_annotation_drives_service_lifecycle() {
    let client: Client = test_client().await;
    let ns = "servicecreator-lifecycle";
    create_namespace(&client, ns).await;

    let controller = start_controller(client.clone(), ns, &[]);
    settle().await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let services = &services;

    // Chapter 1: annotate at creation time
    deployments
        .create(&PostParams::default(), &deployment(ns, "web", Some("8080")))
        .await
        .expect("failed to create Deployment");

    assert!(
        eventually(TIMEOUT, || async move { service_port(services, "web").await == Some(8080) }).await,
        "Service web should expose 8080"
    );

    let svc = services.get("web").await.unwrap();
    let labels = svc.metadata.labels.unwrap();
    assert_eq!(labels.get("team").map(String::as_str), Some("storefront"));
    assert_eq!(
        labels.get(MANAGED_BY_LABEL).map(String::as_str),
        Some(MANAGED_BY_VALUE)
    );
    let spec = svc.spec.unwrap();
    let ports = spec.ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].name.as_deref(), Some(SERVICE_PORT_NAME));
    assert_eq!(
        spec.selector.unwrap().get("app").map(String::as_str),
        Some("web")
    );

    // Chapter 2: change the port
    let mut live = deployments.get("web").await.unwrap();
    live.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(EXPOSE_ANNOTATION.to_string(), "9090".to_string());
    deployments
        .replace("web", &PostParams::default(), &live)
        .await
        .expect("failed to update Deployment");

    assert!(
        eventually(TIMEOUT, || async move { service_port(services, "web").await == Some(9090) }).await,
        "Service web should move to 9090"
    );

    // Chapter 3: remove the annotation
    let mut live = deployments.get("web").await.unwrap();
    if let Some(annotations) = live.metadata.annotations.as_mut() {
        annotations.remove(EXPOSE_ANNOTATION);
    }
    deployments
        .replace("web", &PostParams::default(), &live)
        .await
        .expect("failed to update Deployment");

    assert!(
        eventually(TIMEOUT, || async move { service_gone(services, "web").await }).await,
        "Service web should be deleted"
    );

    controller.stop().await;
    delete_namespace(&client, ns).await;
}

/// Story: deleting an exposed Deployment cleans up its Service
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_deleting_deployment_deletes_service() {
    let client = test_client().await;
    let ns = "servicecreator-delete";
    create_namespace(&client, ns).await;

    let controller = start_controller(client.clone(), ns, &[]);
    settle().await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let services = &services;

    deployments
        .create(&PostParams::default(), &deployment(ns, "api", Some("8080")))
        .await
        .unwrap();
    assert!(eventually(TIMEOUT, || async move { service_port(services, "api").await.is_some() }).await);

    deployments
        .delete("api", &DeleteParams::default())
        .await
        .unwrap();
    assert!(
        eventually(TIMEOUT, || async move { service_gone(services, "api").await }).await,
        "Service api should follow its Deployment"
    );

    controller.stop().await;
    delete_namespace(&client, ns).await;
}

/// Story: Deployments in an excluded namespace are never exposed
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_excluded_namespace_is_left_alone() {
    let client = test_client().await;
    let ns = "servicecreator-excluded";
    create_namespace(&client, ns).await;

    let controller = start_controller(client.clone(), ns, &[ns]);
    settle().await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let services = &services;

    deployments
        .create(&PostParams::default(), &deployment(ns, "hidden", Some("8080")))
        .await
        .unwrap();

    let appeared = eventually(Duration::from_secs(5), || async move {
        service_port(services, "hidden").await.is_some()
    })
    .await;
    assert!(!appeared, "no Service may be created in an excluded namespace");

    controller.stop().await;
    delete_namespace(&client, ns).await;
}
