use crate::{
    config::{target::DeploymentTarget, PatcherConfig},
    drift::{classify, Drift},
    environment::Environment,
    inspect::{inspect, DeploymentId, ObservedState},
    kubectl::Kubectl,
    operator::{Decision, Operator},
    patch::build_patch,
    rules,
    tfvars::{resolve_expected_nodepool, ExpectedConfig},
};
use anyhow::{Context, Result};
use itertools::Itertools;
use std::{path::PathBuf, time::Duration};

/// Everything the coordinator needs to know about a run
#[derive(Clone, Debug)]
pub(crate) struct RunSettings {
    pub(crate) environment: Environment,
    pub(crate) contexts: Vec<String>,
    pub(crate) atlantis_path: PathBuf,
    pub(crate) target: Option<DeploymentTarget>,
    pub(crate) only_missing: bool,
    pub(crate) dry_run: bool,
    pub(crate) batch_size: usize,
    pub(crate) rollout_timeout: Duration,
}

impl From<&PatcherConfig> for RunSettings {
    fn from(config: &PatcherConfig) -> Self {
        Self {
            environment: config.environment,
            contexts: config.effective_contexts(),
            atlantis_path: config.atlantis_path.to_path_buf(),
            target: config.target.clone(),
            only_missing: config.only_missing,
            dry_run: config.dry_run,
            batch_size: config.batch_size,
            rollout_timeout: config.rollout_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Action {
    /// Already scheduled the way its repository says
    Unchanged,
    /// Dry run, a patch would have been applied
    WouldPatch { patch: String },
    Patched,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct DeploymentOutcome {
    pub(crate) id: DeploymentId,
    pub(crate) expected: Option<ExpectedConfig>,
    pub(crate) drift: Option<Drift>,
    pub(crate) action: Action,
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub(crate) struct ClusterReport {
    pub(crate) context: String,
    /// Set when the cluster couldn't even be listed
    pub(crate) error: Option<String>,
    pub(crate) deployments: Vec<DeploymentOutcome>,
    pub(crate) rollout_failures: Vec<String>,
    /// The operator stopped the run at a rollout checkpoint while this cluster was in progress
    pub(crate) aborted: bool,
}

impl ClusterReport {
    fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            ..Default::default()
        }
    }

    fn count(&self, matches: impl Fn(&Action) -> bool) -> usize {
        self.deployments.iter().filter(|outcome| matches(&outcome.action)).count()
    }

    pub(crate) fn patched(&self) -> usize {
        self.count(|action| matches!(action, Action::Patched | Action::WouldPatch { .. }))
    }

    pub(crate) fn unchanged(&self) -> usize {
        self.count(|action| matches!(action, Action::Unchanged))
    }

    pub(crate) fn skipped(&self) -> usize {
        self.count(|action| matches!(action, Action::Skipped { .. }))
    }

    pub(crate) fn failed(&self) -> usize {
        self.count(|action| matches!(action, Action::Failed { .. }))
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub(crate) struct RunReport {
    pub(crate) dry_run: bool,
    pub(crate) clusters: Vec<ClusterReport>,
    /// Why the run stopped before visiting every deployment, if it did
    pub(crate) aborted: Option<String>,
}

pub(crate) struct Coordinator<'a> {
    settings: &'a RunSettings,
    kubectl: &'a dyn Kubectl,
    operator: &'a dyn Operator,
}

impl<'a> Coordinator<'a> {
    pub(crate) fn new(settings: &'a RunSettings, kubectl: &'a dyn Kubectl, operator: &'a dyn Operator) -> Self {
        Self {
            settings,
            kubectl,
            operator,
        }
    }

    pub(crate) async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport {
            dry_run: self.settings.dry_run,
            ..Default::default()
        };

        if !self.settings.dry_run {
            let scope = match &self.settings.target {
                Some(target) => format!("deployment {target}"),
                None => "all non-system deployments".to_string(),
            };

            let summary = format!(
                "About to patch {} of {} environment in clusters: {}",
                scope,
                self.settings.environment,
                self.settings.contexts.join(", ")
            );

            if self.operator.confirm_patching(&summary).await? == Decision::Abort {
                report.aborted = Some("patching not confirmed".to_string());
                return Ok(report);
            }
        }

        for context in &self.settings.contexts {
            let cluster_report = self.process_cluster(context).await.with_context(|| format!("processing cluster {context}"))?;

            log::info!(
                "cluster {}: {} {}, {} unchanged, {} skipped, {} failed, {} rollout failures",
                cluster_report.context,
                cluster_report.patched(),
                if self.settings.dry_run { "to patch" } else { "patched" },
                cluster_report.unchanged(),
                cluster_report.skipped(),
                cluster_report.failed(),
                cluster_report.rollout_failures.len()
            );

            let aborted = cluster_report.aborted;
            report.clusters.push(cluster_report);

            if aborted {
                report.aborted = Some(format!("stopped by the operator after rollout failures in {context}"));
                break;
            }
        }

        Ok(report)
    }

    async fn deployments_of(&self, context: &str) -> Result<Vec<DeploymentId>> {
        if let Some(target) = &self.settings.target {
            return Ok(vec![DeploymentId::new(context, &target.namespace, &target.name)]);
        }

        let list = self.kubectl.list_deployments(context).await.context("listing deployments")?;

        Ok(list
            .items
            .iter()
            .filter_map(|deployment| {
                let namespace = deployment.metadata.namespace.as_deref()?;
                if rules::is_system_namespace(namespace) {
                    log::info!("skipping {}/{}, system namespace", namespace, deployment.metadata.name);
                    return None;
                }
                Some(DeploymentId::new(context, namespace, &deployment.metadata.name))
            })
            .collect())
    }

    async fn process_cluster(&self, context: &str) -> Result<ClusterReport> {
        let mut report = ClusterReport::new(context);

        log::info!("processing cluster {}", context);

        let deployments = match self.deployments_of(context).await {
            Ok(deployments) => deployments,
            Err(err) => {
                log::error!("cluster {}: {:#}", context, err);
                report.error = Some(format!("{:#}", err));
                return Ok(report);
            }
        };

        let mut pending_rollouts = vec![];

        for id in deployments {
            let outcome = self.process_deployment(id).await;

            if outcome.action == Action::Patched {
                pending_rollouts.push(outcome.id.clone());
            }

            report.deployments.push(outcome);

            if pending_rollouts.len() < self.settings.batch_size {
                continue;
            }

            if self.wait_for_rollouts(&mut pending_rollouts, &mut report).await? == Decision::Abort {
                report.aborted = true;
                return Ok(report);
            }
        }

        // The last batch is usually smaller than batch_size
        if self.wait_for_rollouts(&mut pending_rollouts, &mut report).await? == Decision::Abort {
            report.aborted = true;
        }

        Ok(report)
    }

    async fn process_deployment(&self, id: DeploymentId) -> DeploymentOutcome {
        let expected = resolve_expected_nodepool(&self.settings.atlantis_path, &id.namespace, &id.name, self.settings.environment);
        let observed = inspect(self.kubectl, &id).await;

        let (drift, action) = self.decide(&id, &expected, &observed).await;

        DeploymentOutcome {
            id,
            expected: Some(expected),
            drift,
            action,
        }
    }

    async fn decide(&self, id: &DeploymentId, expected: &ExpectedConfig, observed: &ObservedState) -> (Option<Drift>, Action) {
        if !observed.found {
            return (
                None,
                Action::Skipped {
                    reason: "deployment could not be read".to_string(),
                },
            );
        }

        if self.settings.only_missing && (observed.affinity_workload_type.is_some() || observed.toleration_workload_type.is_some()) {
            log::info!("{}: already has a workload-type configuration, skipping", id);
            return (
                None,
                Action::Skipped {
                    reason: "already has a workload-type configuration".to_string(),
                },
            );
        }

        let workload_type = expected.nodepool.workload_type();
        let drift = classify(&workload_type, observed);

        log::info!("{}: nodepool {} ({:?}) {}", id, expected.nodepool, expected.source, drift);

        if !drift.needs_patch {
            return (Some(drift), Action::Unchanged);
        }

        // Spot eligibility is whatever the live deployment prefers, a "-spot" nodepool name alone
        // doesn't make a deployment tolerate spot nodes
        let patch = build_patch(&workload_type, observed.has_spot_affinity, &observed.tolerations);

        let patch = match patch.to_json() {
            Ok(patch) => patch,
            Err(err) => {
                return (
                    Some(drift),
                    Action::Failed {
                        error: format!("{:#}", err),
                    },
                )
            }
        };

        if self.settings.dry_run {
            log::info!("{}: would patch with {}", id, patch);
            return (Some(drift), Action::WouldPatch { patch });
        }

        let action = match self.kubectl.patch_deployment(&id.context, &id.namespace, &id.name, &patch).await {
            Ok(()) => {
                log::info!("{}: patched to workload type {}", id, workload_type);
                Action::Patched
            }
            Err(err) => {
                log::error!("{}: patch failed: {:#}", id, err);
                Action::Failed {
                    error: format!("{:#}", err),
                }
            }
        };

        (Some(drift), action)
    }

    /// Wait for every pending rollout in turn, then hand control to the operator if any of them
    /// didn't finish
    async fn wait_for_rollouts(&self, pending: &mut Vec<DeploymentId>, report: &mut ClusterReport) -> Result<Decision> {
        if pending.is_empty() {
            return Ok(Decision::Continue);
        }

        log::info!(
            "waiting for {} rollouts: {}",
            pending.len(),
            pending.iter().map(|id| format!("{}/{}", id.namespace, id.name)).join(", ")
        );

        let mut failures = vec![];

        for id in pending.drain(..) {
            if let Err(err) = self
                .kubectl
                .rollout_status(&id.context, &id.namespace, &id.name, self.settings.rollout_timeout)
                .await
            {
                log::error!("{}: rollout did not complete: {:#}", id, err);
                failures.push(id.to_string());
            }
        }

        if failures.is_empty() {
            return Ok(Decision::Continue);
        }

        report.rollout_failures.extend(failures.iter().cloned());

        let decision = self.operator.acknowledge_rollout_failures(&failures).await?;

        match decision {
            Decision::Continue => log::info!("operator acknowledged {} rollout failures, continuing", failures.len()),
            Decision::Abort => log::warn!("operator stopped the run after {} rollout failures", failures.len()),
        }

        Ok(decision)
    }
}

pub(crate) async fn run(settings: &RunSettings, kubectl: &dyn Kubectl, operator: &dyn Operator) -> Result<RunReport> {
    Coordinator::new(settings, kubectl, operator).run().await
}
