use crate::environment::Environment;
use anyhow::{ensure, Context, Result};
use clap::Parser;
use clio::ClioPath;
use serde_json::Value;
use std::{env, path::PathBuf, time::Duration};

use self::{cli::Cli, path::ConfigPath, target::DeploymentTarget};

mod cli;
pub(crate) mod path;
pub(crate) mod target;

pub(crate) const CONFIG_ENV_VAR: &str = "NODEPOOL_PATCHER_CONFIG";
pub(crate) const DEFAULT_BATCH_SIZE: usize = 5;
pub(crate) const DEFAULT_ROLLOUT_TIMEOUT_SECONDS: u64 = 300;

/// All parsed CLI arguments, coalesced into a single struct for convenience
#[derive(serde::Serialize)]
pub(crate) struct PatcherConfig {
    pub(crate) environment: Environment,
    pub(crate) dry_run: bool,
    pub(crate) target: Option<DeploymentTarget>,
    pub(crate) only_missing: bool,
    pub(crate) atlantis_path: ConfigPath,
    pub(crate) contexts: Vec<String>,
    pub(crate) batch_size: usize,
    pub(crate) rollout_timeout_seconds: u64,
    pub(crate) assume_yes: bool,
    pub(crate) kubectl: PathBuf,
    pub(crate) summary_file: Option<ConfigPath>,

    pub(crate) config_file_raw: Option<String>,
    pub(crate) cli_raw: Option<String>,
}

impl PatcherConfig {
    pub(crate) fn parse_from_config_file(config_bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(config_bytes)?;

        let mut value = value.as_object().context("config file must be a YAML object")?.clone();

        let environment = Environment::parse(
            value
                .remove("environment")
                .context("environment is required")?
                .as_str()
                .context("environment must be a string")?,
        )?;

        let dry_run = value
            .remove("dry_run")
            .unwrap_or(Value::Bool(false))
            .as_bool()
            .context("dry_run must be a boolean")?;

        let target = match value.remove("deployment") {
            Some(value) => Some(
                DeploymentTarget::parse(value.as_str().context("deployment must be a string")?)
                    .context(format!("deployment {}", value))?,
            ),
            None => None,
        };

        let only_missing = value
            .remove("only_missing")
            .unwrap_or(Value::Bool(false))
            .as_bool()
            .context("only_missing must be a boolean")?;

        let atlantis_path = match value.remove("atlantis_path") {
            Some(value) => {
                let clio_path = ClioPath::new(value.as_str().context("atlantis_path must be a string")?)
                    .context(format!("atlantis_path {}", value))?;

                ensure!(clio_path.try_exists()?, format!("atlantis_path must exist: {}", clio_path));
                ensure!(clio_path.is_dir(), format!("atlantis_path must be a directory: {}", clio_path));

                ConfigPath::from(clio_path)
            }
            None => ConfigPath::new(".")?,
        };

        let contexts = match value.remove("contexts") {
            Some(value) => value
                .as_array()
                .context("contexts must be an array")?
                .iter()
                .map(|value| Ok(value.as_str().context("contexts must be an array of strings")?.to_string()))
                .collect::<Result<Vec<String>>>()?,
            None => vec![],
        };

        let batch_size = match value.remove("batch_size") {
            Some(value) => value
                .as_u64()
                .context("batch_size must be an integer")?
                .try_into()
                .context("batch_size must be an integer")?,
            None => DEFAULT_BATCH_SIZE,
        };

        let rollout_timeout_seconds = match value.remove("rollout_timeout_seconds") {
            Some(value) => value.as_u64().context("rollout_timeout_seconds must be an integer")?,
            None => DEFAULT_ROLLOUT_TIMEOUT_SECONDS,
        };

        let assume_yes = value
            .remove("yes")
            .unwrap_or(Value::Bool(false))
            .as_bool()
            .context("yes must be a boolean")?;

        let kubectl = match value.remove("kubectl") {
            Some(value) => PathBuf::from(value.as_str().context("kubectl must be a string")?),
            None => PathBuf::from("kubectl"),
        };

        let summary_file = match value.remove("summary_file") {
            Some(value) => Some(ConfigPath::from(
                ClioPath::new(value.as_str().context("summary_file must be a string")?)
                    .context(format!("summary_file {}", value))?,
            )),
            None => None,
        };

        ensure!(
            value.is_empty(),
            "unknown keys {:?} in config file",
            value.keys().map(|key| key.to_string()).collect::<Vec<String>>().join(", ")
        );

        let patcher_config = Self {
            environment,
            dry_run,
            target,
            only_missing,
            atlantis_path,
            contexts,
            batch_size,
            rollout_timeout_seconds,
            assume_yes,
            kubectl,
            summary_file,

            cli_raw: None,
            config_file_raw: Some(String::from_utf8_lossy(config_bytes).to_string()),
        };

        patcher_config.validate()?;

        Ok(patcher_config)
    }

    pub(crate) fn parse_from_cli(cli: Cli) -> Result<Self> {
        let patcher_config = Self {
            environment: cli.environment,
            dry_run: cli.dry_run,
            target: cli.deployment,
            only_missing: cli.only_missing,
            atlantis_path: ConfigPath::from(cli.atlantis_path),
            contexts: cli.contexts,
            batch_size: cli.batch_size,
            rollout_timeout_seconds: cli.rollout_timeout,
            assume_yes: cli.yes,
            kubectl: cli.kubectl,
            summary_file: cli.summary_file.map(ConfigPath::from),

            config_file_raw: None,
            cli_raw: Some(serde_json::to_string(&env::args().collect::<Vec<String>>())?),
        };

        patcher_config.validate()?;

        Ok(patcher_config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(self.rollout_timeout_seconds > 0, "rollout timeout must be at least 1 second");
        ensure!(
            self.contexts.iter().all(|context| !context.is_empty()),
            "contexts must not be empty strings"
        );

        Ok(())
    }

    /// The clusters to visit, either given explicitly or all clusters of the environment
    pub(crate) fn effective_contexts(&self) -> Vec<String> {
        if self.contexts.is_empty() {
            self.environment.default_contexts()
        } else {
            self.contexts.clone()
        }
    }

    pub(crate) fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_seconds)
    }

    pub(crate) fn new() -> Result<PatcherConfig> {
        Ok(match std::env::var(CONFIG_ENV_VAR) {
            Ok(var) => {
                let num_args = std::env::args().len();

                ensure!(
                    num_args == 1,
                    "{CONFIG_ENV_VAR} is set, but there are {num_args} CLI arguments. {CONFIG_ENV_VAR} is meant to be used with no arguments."
                );

                PatcherConfig::parse_from_config_file(&std::fs::read(&var).context(format!("reading {CONFIG_ENV_VAR} file {}", var))?)
                    .context(format!("parsing {CONFIG_ENV_VAR} file {}", var))?
            }
            Err(_) => PatcherConfig::parse_from_cli(Cli::parse()).context("CLI parsing")?,
        })
    }
}
