use crate::{environment::Environment, nodepool::Nodepool};
use anyhow::{Context, Result};
use fn_error_context::context;
use hcl::{Body, Expression, ObjectKey};
use std::path::{Path, PathBuf};

const REPOSITORY_PREFIX: &str = "atlantis-";
const NODEPOOL_VARIABLE: &str = "nodepool";
const DEPLOYMENTS_VARIABLE: &str = "deployments";

// Relative to the repository root, in lookup order
const TFVARS_DIRS: [&str; 3] = ["", "environments", "tfvars"];
const VARIABLES_FILES: [&str; 2] = ["variables.tf", "variable.tf"];

/// Where an expected nodepool came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) enum NodepoolSource {
    DeploymentOverride,
    EnvironmentFile,
    SchemaDefault,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) struct ExpectedConfig {
    pub(crate) nodepool: Nodepool,
    pub(crate) source: NodepoolSource,
}

impl ExpectedConfig {
    fn new(nodepool: &str, source: NodepoolSource) -> Self {
        Self {
            nodepool: Nodepool::new(nodepool),
            source,
        }
    }

    fn fallback() -> Self {
        Self {
            nodepool: Nodepool::fallback(),
            source: NodepoolSource::Fallback,
        }
    }
}

pub(crate) fn repository_dir(atlantis_path: &Path, namespace: &str) -> PathBuf {
    atlantis_path.join(format!("{REPOSITORY_PREFIX}{namespace}"))
}

/// Figure out which nodepool the infrastructure repository of a namespace declares for one of its
/// deployments, in this order:
///
/// 1. deployments.<deployment>.nodepool in the environment's tfvars file
/// 2. nodepool in the environment's tfvars file
/// 3. the default of variable "nodepool" in the repository's variables file
/// 4. "core"
///
/// Missing or broken files are never an error, they just fall through to the next step. HCL doesn't
/// allow an attribute to be defined twice in the same body, so a file that does is broken as a
/// whole. Within an object literal a repeated key keeps its last value.
pub(crate) fn resolve_expected_nodepool(atlantis_path: &Path, namespace: &str, deployment: &str, environment: Environment) -> ExpectedConfig {
    let repository = repository_dir(atlantis_path, namespace);

    if !repository.is_dir() {
        return ExpectedConfig::fallback();
    }

    if let Some(tfvars) = find_first_file(&repository, TFVARS_DIRS.iter().map(|dir| Path::new(dir).join(environment.tfvars_file_name()))) {
        if let Some(body) = read_body_or_warn(&tfvars) {
            if let Some(nodepool) = deployment_nodepool(&body, deployment) {
                return ExpectedConfig::new(nodepool, NodepoolSource::DeploymentOverride);
            }

            if let Some(nodepool) = top_level_nodepool(&body) {
                return ExpectedConfig::new(nodepool, NodepoolSource::EnvironmentFile);
            }
        }
    }

    if let Some(variables) = find_first_file(&repository, VARIABLES_FILES.into_iter().map(PathBuf::from)) {
        if let Some(body) = read_body_or_warn(&variables) {
            if let Some(nodepool) = schema_default_nodepool(&body) {
                return ExpectedConfig::new(nodepool, NodepoolSource::SchemaDefault);
            }
        }
    }

    ExpectedConfig::fallback()
}

fn find_first_file(repository: &Path, candidates: impl Iterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.map(|candidate| repository.join(candidate)).find(|path| path.is_file())
}

fn read_body_or_warn(path: &Path) -> Option<Body> {
    match read_body(path) {
        Ok(body) => Some(body),
        Err(err) => {
            log::warn!("ignoring unusable file: {:#}", err);
            None
        }
    }
}

#[context("reading {}", path.display())]
fn read_body(path: &Path) -> Result<Body> {
    let contents = std::fs::read_to_string(path)?;
    hcl::parse(&contents).context("parsing HCL")
}

fn as_string(expression: &Expression) -> Option<&str> {
    match expression {
        Expression::String(value) => Some(value.as_str()),
        _ => None,
    }
}

fn key_matches(key: &ObjectKey, name: &str) -> bool {
    match key {
        ObjectKey::Identifier(identifier) => identifier.as_str() == name,
        ObjectKey::Expression(expression) => as_string(expression) == Some(name),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

fn object_value<'a>(expression: &'a Expression, name: &str) -> Option<&'a Expression> {
    match expression {
        Expression::Object(object) => object.iter().find(|(key, _)| key_matches(key, name)).map(|(_, value)| value),
        _ => None,
    }
}

fn top_level_attribute<'a>(body: &'a Body, name: &str) -> Option<&'a Expression> {
    body.attributes().find(|attribute| attribute.key() == name).map(|attribute| attribute.expr())
}

/// deployments = { <deployment> = { nodepool = "..." } }, with bare or quoted keys
fn deployment_nodepool<'a>(body: &'a Body, deployment: &str) -> Option<&'a str> {
    let deployments = top_level_attribute(body, DEPLOYMENTS_VARIABLE)?;
    let entry = object_value(deployments, deployment)?;
    as_string(object_value(entry, NODEPOOL_VARIABLE)?)
}

fn top_level_nodepool(body: &Body) -> Option<&str> {
    as_string(top_level_attribute(body, NODEPOOL_VARIABLE)?)
}

/// variable "nodepool" { default = "..." }
fn schema_default_nodepool(body: &Body) -> Option<&str> {
    body.blocks()
        .filter(|block| block.identifier() == "variable")
        .find(|block| block.labels().first().map(|label| label.as_str()) == Some(NODEPOOL_VARIABLE))
        .and_then(|block| top_level_attribute(block.body(), "default"))
        .and_then(as_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodepool::WorkloadType;
    use tempfile::TempDir;

    struct Fixture {
        atlantis: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                atlantis: tempfile::tempdir().unwrap(),
            }
        }

        fn write(&self, namespace: &str, relative: &str, contents: &str) -> &Self {
            let path = repository_dir(self.atlantis.path(), namespace).join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
            self
        }

        fn resolve(&self, namespace: &str, deployment: &str, environment: Environment) -> ExpectedConfig {
            resolve_expected_nodepool(self.atlantis.path(), namespace, deployment, environment)
        }
    }

    const VARIABLES_TF: &str = r#"
variable "project" {
  type = string
}

variable "nodepool" {
  type        = string
  description = "Nodepool the service runs on"
  default     = "prometheus-spot"
}
"#;

    #[test]
    fn test_deployment_override_wins() {
        let fixture = Fixture::new();
        fixture
            .write(
                "billing",
                "staging.tfvars",
                r#"
nodepool = "core-spot"

deployments = {
  api = {
    replicas = 2
    nodepool = "gpu-spot"
  }
  "worker" = {
    nodepool = "batch"
  }
}
"#,
            )
            .write("billing", "variables.tf", VARIABLES_TF);

        let expected = fixture.resolve("billing", "api", Environment::Staging);
        assert_eq!(expected, ExpectedConfig::new("gpu-spot", NodepoolSource::DeploymentOverride));
        assert_eq!(expected.nodepool.workload_type(), WorkloadType("gpu".to_string()));

        // Quoted keys work just like bare ones
        assert_eq!(fixture.resolve("billing", "worker", Environment::Staging).nodepool, Nodepool::new("batch"));

        // Deployments without an override get the file-wide nodepool
        assert_eq!(
            fixture.resolve("billing", "cron", Environment::Staging),
            ExpectedConfig::new("core-spot", NodepoolSource::EnvironmentFile)
        );
    }

    #[test]
    fn test_top_level_wins_over_schema_default() {
        let fixture = Fixture::new();
        fixture
            .write("billing", "environments/production.tfvars", "project = \"billing-prod\"\nnodepool = \"highmem\"\n")
            .write("billing", "variables.tf", VARIABLES_TF);

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Production),
            ExpectedConfig::new("highmem", NodepoolSource::EnvironmentFile)
        );
    }

    #[test]
    fn test_schema_default() {
        let fixture = Fixture::new();
        fixture
            .write("billing", "daily.tfvars", "project = \"billing-daily\"\n")
            .write("billing", "variables.tf", VARIABLES_TF);

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Daily),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );

        // No tfvars for this environment at all
        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );
    }

    #[test]
    fn test_fallback() {
        let fixture = Fixture::new();

        // No repository
        assert_eq!(fixture.resolve("billing", "api", Environment::Staging), ExpectedConfig::fallback());

        // Repository without any nodepool declaration
        fixture
            .write("billing", "staging.tfvars", "project = \"billing-staging\"\n")
            .write("billing", "variables.tf", "variable \"project\" {\n  type = string\n}\n");

        assert_eq!(fixture.resolve("billing", "api", Environment::Staging), ExpectedConfig::fallback());
        assert_eq!(ExpectedConfig::fallback().nodepool, Nodepool::new("core"));
    }

    #[test]
    fn test_broken_tfvars_falls_through() {
        let fixture = Fixture::new();
        fixture
            .write("billing", "staging.tfvars", "deployments = {\n  api = {\n    nodepool = \"gpu\"\n")
            .write("billing", "variables.tf", VARIABLES_TF);

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );
    }

    #[test]
    fn test_redefined_attribute_invalidates_file() {
        let fixture = Fixture::new();
        fixture
            .write("billing", "staging.tfvars", "nodepool = \"first\"\nnodepool = \"second\"\n")
            .write("billing", "variables.tf", VARIABLES_TF);

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );

        // Even an unrelated redefinition takes the deployment override down with the file
        fixture.write(
            "billing",
            "staging.tfvars",
            "project = \"a\"\nproject = \"b\"\ndeployments = {\n  api = {\n    nodepool = \"gpu-spot\"\n  }\n}\n",
        );

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );
    }

    #[test]
    fn test_repeated_object_key_keeps_last_value() {
        let fixture = Fixture::new();
        fixture.write(
            "billing",
            "staging.tfvars",
            "deployments = {\n  api = {\n    nodepool = \"first\"\n    nodepool = \"second\"\n  }\n}\n",
        );

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            ExpectedConfig::new("second", NodepoolSource::DeploymentOverride)
        );
    }

    #[test]
    fn test_tfvars_lookup_order() {
        let fixture = Fixture::new();
        fixture
            .write("billing", "environments/staging.tfvars", "nodepool = \"from-environments\"\n")
            .write("billing", "tfvars/staging.tfvars", "nodepool = \"from-tfvars\"\n");

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging).nodepool,
            Nodepool::new("from-environments")
        );

        fixture.write("billing", "staging.tfvars", "nodepool = \"from-root\"\n");

        assert_eq!(fixture.resolve("billing", "api", Environment::Staging).nodepool, Nodepool::new("from-root"));

        // Only the tfvars/ directory has a file for this environment
        fixture.write("billing", "tfvars/daily.tfvars", "nodepool = \"highmem\"\n");

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Daily),
            ExpectedConfig::new("highmem", NodepoolSource::EnvironmentFile)
        );
    }

    #[test]
    fn test_singular_variables_file() {
        let fixture = Fixture::new();
        fixture.write("billing", "variable.tf", VARIABLES_TF);

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Production),
            ExpectedConfig::new("prometheus-spot", NodepoolSource::SchemaDefault)
        );

        // variables.tf is preferred when both exist
        fixture.write("billing", "variables.tf", "variable \"nodepool\" {\n  default = \"core-spot\"\n}\n");

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Production),
            ExpectedConfig::new("core-spot", NodepoolSource::SchemaDefault)
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let fixture = Fixture::new();
        fixture.write("billing", "staging.tfvars", "nodepool = \"core-spot\"\n");

        assert_eq!(
            fixture.resolve("billing", "api", Environment::Staging),
            fixture.resolve("billing", "api", Environment::Staging)
        );
    }
}
