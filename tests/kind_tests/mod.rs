//! Integration tests for servicecreator
//!
//! Each test creates its own namespace, runs a controller scoped to it, and
//! tells the story of a developer exposing a Deployment through the
//! `infracloud.io/service` annotation.
//!
//! - `exposure`: Stories about Services appearing, changing and disappearing as
//!   Deployments are annotated, edited and deleted

mod exposure;
mod helpers;
