//! In-memory deployment backend.
//!
//! Keeps releases in a map and counts calls. Failures and latency can be
//! injected, which lets orchestrator and API tests exercise every driver
//! outcome without a cluster.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::DriverError;
use crate::{DeploymentDriver, DriverFuture, InstallRequest, ReleaseInfo};

#[derive(Debug, Default)]
struct Inner {
    releases: BTreeMap<(String, String), ReleaseInfo>,
    installs: Vec<InstallRequest>,
    uninstall_calls: usize,
    install_failure: Option<String>,
    uninstall_failure: Option<String>,
    install_delay: Duration,
}

#[derive(Debug, Default)]
pub struct InMemoryDriver {
    inner: Mutex<Inner>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following install fail with `stderr`, or succeed on `None`.
    pub fn fail_installs(&self, stderr: Option<&str>) {
        self.lock().install_failure = stderr.map(String::from);
    }

    /// Make every following uninstall fail with `stderr`, or succeed on `None`.
    pub fn fail_uninstalls(&self, stderr: Option<&str>) {
        self.lock().uninstall_failure = stderr.map(String::from);
    }

    /// Delay each install before it takes effect.
    pub fn set_install_delay(&self, delay: Duration) {
        self.lock().install_delay = delay;
    }

    pub fn install_calls(&self) -> usize {
        self.lock().installs.len()
    }

    pub fn uninstall_calls(&self) -> usize {
        self.lock().uninstall_calls
    }

    /// The most recent install request, successful or not.
    pub fn last_install(&self) -> Option<InstallRequest> {
        self.lock().installs.last().cloned()
    }

    pub fn has_release(&self, namespace: &str, release_name: &str) -> bool {
        self.lock()
            .releases
            .contains_key(&(namespace.to_string(), release_name.to_string()))
    }

    /// Register a release that no install call created.
    pub fn insert_release(&self, namespace: &str, release_name: &str) {
        self.insert_release_with_status(namespace, release_name, ReleaseInfo::DEPLOYED);
    }

    /// Register a release in an arbitrary helm status (`failed`,
    /// `pending-install`, ...).
    pub fn insert_release_with_status(&self, namespace: &str, release_name: &str, status: &str) {
        self.lock().releases.insert(
            (namespace.to_string(), release_name.to_string()),
            ReleaseInfo {
                name: release_name.to_string(),
                namespace: namespace.to_string(),
                status: status.to_string(),
            },
        );
    }

    pub fn remove_release(&self, namespace: &str, release_name: &str) {
        self.lock()
            .releases
            .remove(&(namespace.to_string(), release_name.to_string()));
    }
}

impl DeploymentDriver for InMemoryDriver {
    fn install<'a>(&'a self, request: &'a InstallRequest) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let delay = {
                let mut inner = self.lock();
                inner.installs.push(request.clone());
                inner.install_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut inner = self.lock();
            if let Some(stderr) = inner.install_failure.clone() {
                return Err(DriverError::Command {
                    operation: "install",
                    status: "exit code 1".to_string(),
                    stderr,
                });
            }
            inner.releases.insert(
                (request.namespace.clone(), request.release_name.clone()),
                ReleaseInfo {
                    name: request.release_name.clone(),
                    namespace: request.namespace.clone(),
                    status: ReleaseInfo::DEPLOYED.to_string(),
                },
            );
            Ok(())
        })
    }

    fn uninstall<'a>(
        &'a self,
        namespace: &'a str,
        release_name: &'a str,
        _timeout: Duration,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.uninstall_calls += 1;
            if let Some(stderr) = inner.uninstall_failure.clone() {
                return Err(DriverError::Command {
                    operation: "uninstall",
                    status: "exit code 1".to_string(),
                    stderr,
                });
            }
            match inner
                .releases
                .remove(&(namespace.to_string(), release_name.to_string()))
            {
                Some(_) => Ok(()),
                None => Err(DriverError::ReleaseNotFound {
                    namespace: namespace.to_string(),
                    release: release_name.to_string(),
                }),
            }
        })
    }

    fn list_releases(&self) -> DriverFuture<'_, Vec<ReleaseInfo>> {
        Box::pin(async move { Ok(self.lock().releases.values().cloned().collect()) })
    }
}
