//! Exposure annotation policy
//!
//! A Deployment opts in to a managed Service by carrying the exposure
//! annotation; its value is the port. Reading the annotation never validates
//! it. Validation happens in [`parse_port`], which only the worker calls, so a
//! malformed value surfaces as an apply-time error instead of a silent skip.

use k8s_openapi::api::apps::v1::Deployment;

use crate::intent::ObjectKey;
use crate::{Error, Result};

/// Default annotation key marking a Deployment for exposure
pub const EXPOSE_ANNOTATION: &str = "infracloud.io/service";

/// Read the exposure annotation from a Deployment.
///
/// Returns the raw value when the annotation is present (even if empty),
/// `None` when it is absent or the Deployment has no annotations at all.
pub fn classify_annotation<'a>(deployment: &'a Deployment, annotation_key: &str) -> Option<&'a str> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(annotation_key)
        .map(String::as_str)
}

/// Parse a raw annotation value into a Service port.
pub fn parse_port(key: &ObjectKey, raw: &str) -> Result<i32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_port(key.to_string(), raw, "value is empty"));
    }

    let port: i64 = trimmed
        .parse()
        .map_err(|e| Error::invalid_port(key.to_string(), raw, format!("not a number: {e}")))?;

    if !(1..=65535).contains(&port) {
        return Err(Error::invalid_port(
            key.to_string(),
            raw,
            "must be between 1 and 65535",
        ));
    }

    Ok(port as i32)
}
