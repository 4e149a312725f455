use crate::{
    k8s::{Deployment, Toleration},
    kubectl::Kubectl,
    nodepool::WorkloadType,
    rules::{GKE_PROVISIONING_KEY, GKE_SPOT_KEY, SPOT_PROVISIONING_VALUE, TOLERATION_EFFECT_NO_SCHEDULE, TOLERATION_OPERATOR_EQUAL, WORKLOAD_TYPE_KEY},
};
use std::fmt::Display;

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub(crate) struct DeploymentId {
    pub(crate) context: String,
    pub(crate) namespace: String,
    pub(crate) name: String,
}

impl DeploymentId {
    pub(crate) fn new(context: &str, namespace: &str, name: &str) -> Self {
        Self {
            context: context.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.context)
    }
}

/// The scheduling configuration a deployment currently has in the cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ObservedState {
    /// False when the deployment couldn't be read, in which case every other field is absent
    pub(crate) found: bool,
    pub(crate) affinity_workload_type: Option<WorkloadType>,
    pub(crate) toleration_workload_type: Option<WorkloadType>,
    pub(crate) has_spot_affinity: bool,
    pub(crate) has_spot_toleration: bool,
    pub(crate) tolerations: Vec<Toleration>,
    pub(crate) replicas: Option<i32>,
    pub(crate) image: Option<String>,
}

impl ObservedState {
    pub(crate) fn absent() -> Self {
        Self::default()
    }

    pub(crate) fn from_deployment(deployment: &Deployment) -> Self {
        let node_affinity = deployment.node_affinity();

        let affinity_workload_type = node_affinity
            .and_then(|node_affinity| node_affinity.required_during_scheduling_ignored_during_execution.as_ref())
            .into_iter()
            .flat_map(|selector| selector.node_selector_terms.iter())
            .flat_map(|term| term.expressions().iter())
            .filter(|requirement| requirement.key == WORKLOAD_TYPE_KEY)
            .find_map(|requirement| requirement.values.as_ref()?.first().cloned())
            .map(WorkloadType);

        // Older deployments got their spot preference through the provisioning label, newer ones
        // through the gke-spot label, both count
        let has_spot_affinity = node_affinity
            .and_then(|node_affinity| node_affinity.preferred_during_scheduling_ignored_during_execution.as_ref())
            .into_iter()
            .flatten()
            .flat_map(|preferred| preferred.preference.expressions().iter())
            .any(|requirement| {
                (requirement.key == GKE_PROVISIONING_KEY
                    && requirement
                        .values
                        .as_ref()
                        .is_some_and(|values| values.iter().any(|value| value == SPOT_PROVISIONING_VALUE)))
                    || requirement.key == GKE_SPOT_KEY
            });

        let tolerations = deployment.tolerations().to_vec();

        let toleration_workload_type = tolerations
            .iter()
            .find(|toleration| toleration.has_key(WORKLOAD_TYPE_KEY))
            .and_then(|toleration| toleration.value.clone())
            .map(WorkloadType);

        let has_spot_toleration = tolerations.iter().any(is_spot_toleration);

        let pod_spec = deployment.pod_spec();

        Self {
            found: true,
            affinity_workload_type,
            toleration_workload_type,
            has_spot_affinity,
            has_spot_toleration,
            tolerations,
            replicas: deployment.spec.as_ref().and_then(|spec| spec.replicas),
            image: pod_spec
                .and_then(|pod_spec| pod_spec.containers.first())
                .and_then(|container| container.image.clone()),
        }
    }
}

pub(crate) fn is_spot_toleration(toleration: &Toleration) -> bool {
    toleration.has_key(GKE_SPOT_KEY)
        && toleration.operator.as_deref() == Some(TOLERATION_OPERATOR_EQUAL)
        && toleration.value.as_deref() == Some("true")
        && toleration.effect.as_deref() == Some(TOLERATION_EFFECT_NO_SCHEDULE)
}

/// Read the live deployment. A deployment that can't be read (deleted mid-run, API errors) is
/// reported as absent rather than failing the run.
pub(crate) async fn inspect(kubectl: &dyn Kubectl, id: &DeploymentId) -> ObservedState {
    match kubectl.get_deployment(&id.context, &id.namespace, &id.name).await {
        Ok(deployment) => ObservedState::from_deployment(&deployment),
        Err(err) => {
            log::warn!("could not read deployment {}: {:#}", id, err);
            ObservedState::absent()
        }
    }
}
