use super::target::DeploymentTarget;
use crate::environment::Environment;
use clap::Parser;
use clio::ClioPath;
use std::path::PathBuf;

/// Pin every Deployment of an environment's clusters to the nodepool its atlantis repository
/// declares, by patching its workload-type node affinity and tolerations
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Environment to patch: daily, staging or production. Selects both the clusters and the
    /// tfvars file read from every repository.
    #[clap(value_parser = Environment::parse)]
    pub(crate) environment: Environment,

    /// Only report what would be patched, don't touch the clusters
    #[clap(long)]
    pub(crate) dry_run: bool,

    /// Only process a single deployment, given as <namespace>/<deployment>. System namespaces are
    /// not skipped when a deployment is targeted explicitly.
    #[clap(long, value_parser = DeploymentTarget::parse)]
    pub(crate) deployment: Option<DeploymentTarget>,

    /// Only consider deployments that have neither a workload-type affinity nor a workload-type
    /// toleration yet, leaving deployments that point at the wrong workload type alone
    #[clap(long)]
    pub(crate) only_missing: bool,

    /// Directory containing the atlantis-<namespace> repository checkouts
    #[clap(long, default_value = ".", value_parser = clap::value_parser!(ClioPath).exists().is_dir())]
    pub(crate) atlantis_path: ClioPath,

    /// kubectl context to patch. Can specify multiple times. Defaults to all clusters of the
    /// environment.
    #[clap(long = "context")]
    pub(crate) contexts: Vec<String>,

    /// Number of patched deployments after which the patcher waits for their rollouts
    #[clap(long, default_value_t = super::DEFAULT_BATCH_SIZE)]
    pub(crate) batch_size: usize,

    /// Seconds to wait for each rollout before asking the operator what to do
    #[clap(long, default_value_t = super::DEFAULT_ROLLOUT_TIMEOUT_SECONDS)]
    pub(crate) rollout_timeout: u64,

    /// Don't ask for confirmation before patching. Failed rollouts still wait for the operator.
    #[clap(long, short = 'y')]
    pub(crate) yes: bool,

    /// kubectl binary to use
    #[clap(long, default_value = "kubectl")]
    pub(crate) kubectl: PathBuf,

    /// Write a YAML summary of the run to this file
    #[clap(long, value_parser = clap::value_parser!(ClioPath))]
    pub(crate) summary_file: Option<ClioPath>,
}
