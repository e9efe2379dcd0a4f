//! System namespace registry for exposure exclusions
//!
//! Deployments in these namespaces belong to the control plane or to cluster
//! add-ons and never get a managed Service, whatever their annotations say.

/// Core Kubernetes namespaces
pub const CORE: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Local storage provisioner namespace (kind, k3s)
pub const STORAGE: &[&str] = &["local-path-storage"];

/// Get the default excluded namespaces.
///
/// Returns a sorted, deduplicated list.
pub fn all() -> Vec<&'static str> {
    let mut namespaces: Vec<&'static str> = CORE.iter().chain(STORAGE.iter()).copied().collect();

    namespaces.sort();
    namespaces.dedup();
    namespaces
}
