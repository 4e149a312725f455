use crate::{
    k8s::{Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, Toleration},
    nodepool::WorkloadType,
    rules::{GKE_SPOT_KEY, NODE_SELECTOR_OPERATOR_IN, WORKLOAD_TYPE_KEY},
};
use anyhow::{Context, Result};
use serde::Serialize;

/// A JSON merge patch against a Deployment. Merge patches replace arrays wholesale, so the
/// tolerations list here is the complete list the deployment will end up with, while the
/// affinity object is merged and leaves preferred affinities untouched.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DeploymentPatch {
    spec: PatchDeploymentSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct PatchDeploymentSpec {
    template: PatchPodTemplate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct PatchPodTemplate {
    spec: PatchPodSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct PatchPodSpec {
    affinity: Affinity,
    tolerations: Vec<Toleration>,
}

impl DeploymentPatch {
    pub(crate) fn tolerations(&self) -> &[Toleration] {
        &self.spec.template.spec.tolerations
    }

    pub(crate) fn affinity(&self) -> &Affinity {
        &self.spec.template.spec.affinity
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing deployment patch")
    }
}

pub(crate) struct PatchBuilder<'a> {
    workload_type: &'a WorkloadType,
    include_spot_toleration: bool,
    existing_tolerations: &'a [Toleration],
}

impl<'a> PatchBuilder<'a> {
    pub(crate) fn new(workload_type: &'a WorkloadType) -> Self {
        Self {
            workload_type,
            include_spot_toleration: false,
            existing_tolerations: &[],
        }
    }

    pub(crate) fn include_spot_toleration(mut self, include_spot_toleration: bool) -> Self {
        self.include_spot_toleration = include_spot_toleration;
        self
    }

    pub(crate) fn existing_tolerations(mut self, existing_tolerations: &'a [Toleration]) -> Self {
        self.existing_tolerations = existing_tolerations;
        self
    }

    pub(crate) fn build(self) -> DeploymentPatch {
        let affinity = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: WORKLOAD_TYPE_KEY.to_string(),
                            operator: NODE_SELECTOR_OPERATOR_IN.to_string(),
                            values: Some(vec![self.workload_type.to_string()]),
                        }]),
                        match_fields: None,
                    }],
                }),
                preferred_during_scheduling_ignored_during_execution: None,
            }),
        };

        // Workload type first, then whatever else the deployment tolerated, then spot
        let mut tolerations = vec![Toleration::equal_no_schedule(WORKLOAD_TYPE_KEY, self.workload_type.as_str())];

        tolerations.extend(
            self.existing_tolerations
                .iter()
                .filter(|toleration| !toleration.has_key(WORKLOAD_TYPE_KEY) && !toleration.has_key(GKE_SPOT_KEY))
                .cloned(),
        );

        if self.include_spot_toleration {
            tolerations.push(Toleration::equal_no_schedule(GKE_SPOT_KEY, "true"));
        } else if let Some(existing_spot) = self.existing_tolerations.iter().find(|toleration| toleration.has_key(GKE_SPOT_KEY)) {
            tolerations.push(existing_spot.clone());
        }

        DeploymentPatch {
            spec: PatchDeploymentSpec {
                template: PatchPodTemplate {
                    spec: PatchPodSpec { affinity, tolerations },
                },
            },
        }
    }
}

pub(crate) fn build_patch(workload_type: &WorkloadType, include_spot_toleration: bool, existing_tolerations: &[Toleration]) -> DeploymentPatch {
    PatchBuilder::new(workload_type)
        .include_spot_toleration(include_spot_toleration)
        .existing_tolerations(existing_tolerations)
        .build()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{drift::classify, inspect::ObservedState, k8s::Deployment};
    use serde_json::{json, Value};

    /// RFC 7386 JSON merge patch, which is what kubectl patch --type merge does server side
    pub(crate) fn apply_merge_patch(target: &mut Value, patch: &Value) {
        match patch {
            Value::Object(patch) => {
                if !target.is_object() {
                    *target = Value::Object(serde_json::Map::new());
                }
                let target = target.as_object_mut().unwrap();
                for (key, value) in patch {
                    if value.is_null() {
                        target.remove(key);
                    } else {
                        apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
            _ => *target = patch.clone(),
        }
    }

    fn tolerations(value: Value) -> Vec<Toleration> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_preserves_unrelated_tolerations() {
        let existing = tolerations(json!([
            {"key": "custom"},
            {"key": "workload-type", "value": "old"}
        ]));

        let patch = build_patch(&WorkloadType("gpu".to_string()), false, &existing);

        assert_eq!(
            patch.tolerations(),
            tolerations(json!([
                {"key": "workload-type", "operator": "Equal", "value": "gpu", "effect": "NoSchedule"},
                {"key": "custom"}
            ]))
        );
    }

    #[test]
    fn test_preserved_order_is_stable() {
        let existing = tolerations(json!([
            {"key": "b", "operator": "Exists"},
            {"key": "cloud.google.com/gke-spot", "operator": "Equal", "value": "true", "effect": "NoSchedule"},
            {"key": "a", "operator": "Exists", "effect": "NoExecute", "tolerationSeconds": 30},
            {"key": "workload-type", "operator": "Equal", "value": "core", "effect": "NoSchedule"}
        ]));

        let patch = build_patch(&WorkloadType("core".to_string()), false, &existing);

        let keys = patch
            .tolerations()
            .iter()
            .map(|toleration| toleration.key.clone().unwrap())
            .collect::<Vec<_>>();

        // The pre-existing spot toleration is kept, but moves to the end
        assert_eq!(keys, vec!["workload-type", "b", "a", "cloud.google.com/gke-spot"]);
        assert_eq!(patch.tolerations()[2].toleration_seconds, Some(30));
    }

    #[test]
    fn test_spot_toleration_added_once() {
        let existing = tolerations(json!([
            {"key": "cloud.google.com/gke-spot", "operator": "Exists"}
        ]));

        let patch = build_patch(&WorkloadType("core".to_string()), true, &existing);

        assert_eq!(
            patch.tolerations(),
            tolerations(json!([
                {"key": "workload-type", "operator": "Equal", "value": "core", "effect": "NoSchedule"},
                {"key": "cloud.google.com/gke-spot", "operator": "Equal", "value": "true", "effect": "NoSchedule"}
            ]))
        );
    }

    #[test]
    fn test_patch_json() -> Result<()> {
        let patch = build_patch(&WorkloadType("prometheus".to_string()), false, &[]);

        let value: Value = serde_json::from_str(&patch.to_json()?)?;

        assert_eq!(
            value,
            json!({"spec": {"template": {"spec": {
                "affinity": {"nodeAffinity": {"requiredDuringSchedulingIgnoredDuringExecution": {"nodeSelectorTerms": [
                    {"matchExpressions": [{"key": "workload-type", "operator": "In", "values": ["prometheus"]}]}
                ]}}},
                "tolerations": [{"key": "workload-type", "operator": "Equal", "value": "prometheus", "effect": "NoSchedule"}]
            }}}})
        );

        // The preferred terms are absent from the patch so the merge leaves them alone
        let node_affinity = patch.affinity().node_affinity.as_ref().unwrap();
        assert!(node_affinity.preferred_during_scheduling_ignored_during_execution.is_none());
        assert_eq!(node_affinity.required_during_scheduling_ignored_during_execution.as_ref().unwrap().node_selector_terms.len(), 1);

        Ok(())
    }

    #[test]
    fn test_applied_patch_resolves_drift() -> Result<()> {
        let mut live = json!({
            "metadata": {"name": "api", "namespace": "billing"},
            "spec": {"template": {"spec": {
                "affinity": {"nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {"nodeSelectorTerms": [
                        {"matchExpressions": [{"key": "workload-type", "operator": "In", "values": ["core"]}]}
                    ]},
                    "preferredDuringSchedulingIgnoredDuringExecution": [
                        {"weight": 100, "preference": {"matchExpressions": [
                            {"key": "cloud.google.com/gke-provisioning", "operator": "In", "values": ["spot"]}
                        ]}}
                    ]
                }},
                "tolerations": [{"key": "dedicated", "operator": "Exists"}]
            }}}
        });

        let expected = WorkloadType("gpu".to_string());
        let observed = ObservedState::from_deployment(&serde_json::from_value::<Deployment>(live.clone())?);
        let drift = classify(&expected, &observed);
        assert!(drift.needs_patch);

        let patch = build_patch(&expected, observed.has_spot_affinity, &observed.tolerations);
        apply_merge_patch(&mut live, &serde_json::from_str(&patch.to_json()?)?);

        let observed = ObservedState::from_deployment(&serde_json::from_value::<Deployment>(live.clone())?);
        let drift = classify(&expected, &observed);

        assert!(!drift.needs_patch, "{}", drift);
        assert!(drift.reasons.is_empty());
        // The merge must leave the preferred spot affinity alone
        assert!(observed.has_spot_affinity);
        assert!(observed.tolerations.iter().any(|toleration| toleration.has_key("dedicated")));

        Ok(())
    }
}
