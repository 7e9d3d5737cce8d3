//! Helm CLI adapter.
//!
//! Each operation spawns one `helm` child. The child is bounded by a tokio
//! timeout slightly longer than the `--timeout` handed to helm, so helm's own
//! timeout normally fires first and reports a useful message. The child is
//! spawned with `kill_on_drop`, which ties its lifetime to the returned
//! future.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::{DeploymentDriver, DriverFuture, InstallRequest, ReleaseInfo};

/// Extra time granted past helm's own `--timeout` before the child is killed.
const KILL_GRACE: Duration = Duration::from_secs(30);

/// Bound on `helm list`, which never waits on cluster resources.
const LIST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HelmDriver {
    binary: PathBuf,
    kube_context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl HelmDriver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kube_context: None,
            kubeconfig: None,
        }
    }

    pub fn with_kube_context(mut self, kube_context: Option<String>) -> Self {
        self.kube_context = kube_context;
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    /// Flags selecting the target cluster, appended to every invocation.
    fn cluster_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ctx) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(ctx.clone());
        }
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        args
    }

    async fn run(
        &self,
        operation: &'static str,
        mut args: Vec<String>,
        timeout: Duration,
    ) -> DriverResult<Output> {
        args.extend(self.cluster_args());

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(operation, binary = %self.binary.display(), ?args, "running helm");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| DriverError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?,
            Err(_) => {
                warn!(operation, timeout_secs = timeout.as_secs(), "helm timed out, killed");
                return Err(DriverError::Timeout { operation, timeout });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(DriverError::Command {
                operation,
                status,
                stderr,
            });
        }

        Ok(output)
    }
}

/// Arguments for `helm upgrade --install`, without cluster flags.
pub fn install_args(request: &InstallRequest) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        request.release_name.clone(),
        request.chart.chart_arg().to_string(),
        "--namespace".to_string(),
        request.namespace.clone(),
        "--create-namespace".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        helm_duration(request.timeout),
    ];
    if let Some(repo) = request.chart.repo_url() {
        args.push("--repo".to_string());
        args.push(repo.to_string());
    }
    if let Some(version) = &request.chart_version {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    for set in request.values.set_args() {
        args.push("--set".to_string());
        args.push(set);
    }
    for set in request.values.set_json_args() {
        args.push("--set-json".to_string());
        args.push(set);
    }
    args
}

/// Arguments for `helm uninstall`, without cluster flags.
pub fn uninstall_args(namespace: &str, release_name: &str, timeout: Duration) -> Vec<String> {
    vec![
        "uninstall".to_string(),
        release_name.to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        helm_duration(timeout),
    ]
}

/// Arguments for listing every release in every state.
pub fn list_args() -> Vec<String> {
    ["list", "--all-namespaces", "--all", "--output", "json"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Parse `helm list -o json` output. Helm prints nothing at all (not `[]`)
/// for some versions when no releases exist.
pub fn parse_release_list(stdout: &[u8]) -> DriverResult<Vec<ReleaseInfo>> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| DriverError::Output(e.to_string()))
}

fn helm_duration(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

/// Helm's own missing-release errors. Other failures can mention "not found"
/// (a missing auth plugin, an unknown context) and must not match.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found") || stderr.contains("Release not loaded")
}

impl DeploymentDriver for HelmDriver {
    fn install<'a>(&'a self, request: &'a InstallRequest) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.run("install", install_args(request), request.timeout + KILL_GRACE)
                .await?;
            debug!(
                namespace = %request.namespace,
                release = %request.release_name,
                "helm install complete"
            );
            Ok(())
        })
    }

    fn uninstall<'a>(
        &'a self,
        namespace: &'a str,
        release_name: &'a str,
        timeout: Duration,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let args = uninstall_args(namespace, release_name, timeout);
            match self.run("uninstall", args, timeout + KILL_GRACE).await {
                Ok(_) => Ok(()),
                Err(DriverError::Command { stderr, .. }) if is_not_found(&stderr) => {
                    Err(DriverError::ReleaseNotFound {
                        namespace: namespace.to_string(),
                        release: release_name.to_string(),
                    })
                }
                Err(e) => Err(e),
            }
        })
    }

    fn list_releases(&self) -> DriverFuture<'_, Vec<ReleaseInfo>> {
        Box::pin(async move {
            let output = self.run("list", list_args(), LIST_TIMEOUT).await?;
            parse_release_list(&output.stdout)
        })
    }
}
