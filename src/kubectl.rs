use crate::k8s::{Deployment, DeploymentList};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::process::Command;

/// Everything the patcher needs from a cluster. Implemented by shelling out to kubectl, and by
/// an in-memory fake in tests.
#[async_trait]
pub(crate) trait Kubectl: Send + Sync {
    async fn list_deployments(&self, context: &str) -> Result<DeploymentList>;

    async fn get_deployment(&self, context: &str, namespace: &str, name: &str) -> Result<Deployment>;

    /// Apply a JSON merge patch to a deployment
    async fn patch_deployment(&self, context: &str, namespace: &str, name: &str, patch: &str) -> Result<()>;

    /// Block until the deployment's rollout completes, failing if it doesn't within timeout
    async fn rollout_status(&self, context: &str, namespace: &str, name: &str, timeout: Duration) -> Result<()>;
}

pub(crate) struct KubectlCli {
    binary: PathBuf,
}

impl KubectlCli {
    pub(crate) fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let result = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("spawning {}", self.binary.display()))?;

        ensure!(
            result.status.success(),
            "kubectl {} failed ({}): {}",
            args.first().unwrap_or(&""),
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        );

        Ok(result.stdout)
    }
}

#[async_trait]
impl Kubectl for KubectlCli {
    async fn list_deployments(&self, context: &str) -> Result<DeploymentList> {
        let stdout = self
            .run(&["get", "deployments", "--all-namespaces", "--output", "json", "--context", context])
            .await?;

        serde_json::from_slice(&stdout).context("decoding deployment list")
    }

    async fn get_deployment(&self, context: &str, namespace: &str, name: &str) -> Result<Deployment> {
        let stdout = self
            .run(&[
                "get",
                "deployment",
                name,
                "--namespace",
                namespace,
                "--output",
                "json",
                "--context",
                context,
            ])
            .await?;

        serde_json::from_slice(&stdout).with_context(|| format!("decoding deployment {namespace}/{name}"))
    }

    async fn patch_deployment(&self, context: &str, namespace: &str, name: &str, patch: &str) -> Result<()> {
        self.run(&[
            "patch",
            "deployment",
            name,
            "--namespace",
            namespace,
            "--context",
            context,
            "--type",
            "merge",
            "--patch",
            patch,
        ])
        .await?;

        Ok(())
    }

    async fn rollout_status(&self, context: &str, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let deployment = format!("deployment/{name}");
        let timeout = format!("--timeout={}s", timeout.as_secs());

        self.run(&[
            "rollout",
            "status",
            deployment.as_str(),
            "--namespace",
            namespace,
            "--context",
            context,
            timeout.as_str(),
        ])
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in kubectl binary that records its arguments and answers with a canned response
    fn fake_kubectl(dir: &TempDir, stdout: &str, exit_code: i32) -> KubectlCli {
        let binary = dir.path().join("kubectl");
        let args_file = dir.path().join("args");

        std::fs::write(
            &binary,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\ncat <<'EOF'\n{}\nEOF\necho 'Error from server' >&2\nexit {}\n",
                args_file.display(),
                stdout,
                exit_code
            ),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        KubectlCli::new(binary)
    }

    fn recorded_args(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("args")).unwrap().trim().to_string()
    }

    #[tokio::test]
    #[serial]
    async fn test_get_deployment() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let kubectl = fake_kubectl(&dir, r#"{"metadata": {"name": "api", "namespace": "billing"}, "spec": {"replicas": 3}}"#, 0);

        let deployment = kubectl.get_deployment("staging-1", "billing", "api").await?;

        assert_eq!(deployment.metadata.name, "api");
        assert_eq!(deployment.spec.and_then(|spec| spec.replicas), Some(3));
        assert_eq!(
            recorded_args(&dir),
            "get deployment api --namespace billing --output json --context staging-1"
        );

        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_patch_and_rollout_arguments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let kubectl = fake_kubectl(&dir, "", 0);

        kubectl.patch_deployment("daily-1", "billing", "api", "{}").await?;
        assert_eq!(
            recorded_args(&dir),
            "patch deployment api --namespace billing --context daily-1 --type merge --patch {}"
        );

        kubectl.rollout_status("daily-1", "billing", "api", Duration::from_secs(90)).await?;
        assert_eq!(
            recorded_args(&dir),
            "rollout status deployment/api --namespace billing --context daily-1 --timeout=90s"
        );

        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_failure_reports_stderr() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let kubectl = fake_kubectl(&dir, "", 1);

        let err = kubectl.list_deployments("daily-1").await.err().unwrap();

        assert!(format!("{err:#}").contains("kubectl get failed"), "{err:#}");
        assert!(format!("{err:#}").contains("Error from server"), "{err:#}");

        Ok(())
    }
}
