//! servicecreator - derives a Kubernetes Service for every annotated Deployment
//!
//! A Deployment opts in by carrying the `infracloud.io/service` annotation,
//! whose value is the port to expose. The controller keeps exactly one Service
//! of the same name and namespace in step with that annotation: it creates the
//! Service when the annotation appears, replaces it when the port changes, and
//! deletes it when the annotation or the Deployment goes away.
//!
//! # Architecture
//!
//! - [`watch`] turns the Deployment watch stream into add/update/delete callbacks
//! - [`classifier`] decides what each callback means and enqueues an intent
//! - [`queue`] deduplicates intents per Deployment and rate-limits retries
//! - [`worker`] applies one intent at a time through a [`service::ServiceClient`]
//! - [`controller`] wires the pieces together and owns their lifecycle

#![deny(missing_docs)]

pub mod annotation;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod intent;
pub mod kube_utils;
pub mod queue;
pub mod service;
pub mod system_namespaces;
pub mod telemetry;
pub mod watch;
pub mod worker;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
