use std::collections::HashSet;

use lazy_static::lazy_static;

pub(crate) const WORKLOAD_TYPE_KEY: &str = "workload-type";
pub(crate) const GKE_SPOT_KEY: &str = "cloud.google.com/gke-spot";
pub(crate) const GKE_PROVISIONING_KEY: &str = "cloud.google.com/gke-provisioning";
pub(crate) const SPOT_PROVISIONING_VALUE: &str = "spot";

pub(crate) const TOLERATION_OPERATOR_EQUAL: &str = "Equal";
pub(crate) const TOLERATION_EFFECT_NO_SCHEDULE: &str = "NoSchedule";
pub(crate) const NODE_SELECTOR_OPERATOR_IN: &str = "In";

lazy_static! {
    // Namespaces owned by GKE, istio and the platform itself. Their workloads are scheduled by
    // their own operators and must never be pinned to an application nodepool. Only skipped when
    // scanning whole clusters, an explicitly targeted deployment is always processed.
    pub(crate) static ref SYSTEM_NAMESPACES: HashSet<String> = vec![
        "kube-system",
        "kube-public",
        "kube-node-lease",
        "istio-system",
        "istio-ingress",
        "gke-gmp-system",
        "gmp-system",
        "gmp-public",
        "gke-managed-system",
        "gke-managed-cim",
        "config-management-system",
        "cert-manager",
    ]
        .into_iter()
        .map(str::to_string)
        .collect();
}

pub(crate) fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(namespace)
}
