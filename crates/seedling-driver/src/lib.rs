//! seedling-driver — the deployment backend capability.
//!
//! The orchestrator never talks to the cluster directly. It hands a fully
//! resolved [`InstallRequest`] to a [`DeploymentDriver`], which installs,
//! uninstalls, and lists releases. [`HelmDriver`] shells out to the `helm`
//! CLI; [`InMemoryDriver`] keeps releases in a map and is used by tests.
//!
//! # Cancellation
//!
//! Driver futures own their child processes. Dropping a future kills the
//! child, so cancelling a request (or shutting the daemon down) never leaves
//! a detached `helm` behind.

pub mod error;
pub mod helm;
pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use seedling_core::{ChartRef, ResolvedValues};
use serde::{Deserialize, Serialize};

pub use error::{DriverError, DriverResult};
pub use helm::HelmDriver;
pub use memory::InMemoryDriver;

/// Boxed future returned by every driver operation.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'a>>;

/// Everything the backend needs to deploy one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub namespace: String,
    pub release_name: String,
    pub chart: ChartRef,
    /// Semver requirement passed through as `--version`.
    pub chart_version: Option<String>,
    pub values: ResolvedValues,
    pub timeout: Duration,
}

/// A release as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub status: String,
}

impl ReleaseInfo {
    /// Helm status of a release whose last operation completed.
    pub const DEPLOYED: &'static str = "deployed";

    /// False for `failed` and `pending-*` releases left by an interrupted
    /// operation.
    pub fn is_deployed(&self) -> bool {
        self.status == Self::DEPLOYED
    }
}

/// Deployment backend. Injected so the orchestrator can be tested without
/// a cluster.
pub trait DeploymentDriver: Send + Sync {
    /// Create the namespace if absent, install or upgrade the release, and
    /// wait until it is ready or `request.timeout` elapses.
    fn install<'a>(&'a self, request: &'a InstallRequest) -> DriverFuture<'a, ()>;

    /// Remove a release. Fails with [`DriverError::ReleaseNotFound`] if the
    /// backend has no such release.
    fn uninstall<'a>(
        &'a self,
        namespace: &'a str,
        release_name: &'a str,
        timeout: Duration,
    ) -> DriverFuture<'a, ()>;

    /// All releases across all namespaces.
    fn list_releases(&self) -> DriverFuture<'_, Vec<ReleaseInfo>>;
}
