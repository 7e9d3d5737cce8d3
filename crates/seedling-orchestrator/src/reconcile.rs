//! Reconciler: converges the registry with what the cluster reports.
//!
//! Runs once at startup and then periodically. Each pass:
//!
//! 1. retries registry writes that failed after the cluster had changed;
//! 2. resolves transient records whose operation is gone (cancelled request,
//!    crash, restart) using the driver's release list and release status;
//! 3. reports releases in tenant namespaces with no record, and installed
//!    records whose release is missing. These are logged, never mutated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use seedling_core::InstallationKey;
use seedling_driver::ReleaseInfo;
use seedling_state::{EventKind, InstallationRecord, InstallationStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::OrchestratorResult;
use crate::orchestrator::Orchestrator;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub repairs_applied: usize,
    pub repairs_pending: usize,
    /// Stale `installing` records whose release is deployed, now `installed`.
    pub promoted: Vec<InstallationKey>,
    /// Stale records whose release is gone, now deleted.
    pub removed: Vec<InstallationKey>,
    /// Stale records whose release survived unfinished (`installing` with a
    /// failed or pending release, or any `uninstalling`), now `errored`.
    pub errored: Vec<InstallationKey>,
    /// Releases in tenant namespaces without a record.
    pub orphans: Vec<ReleaseInfo>,
    /// `installed` records whose release the driver does not report.
    pub missing: Vec<InstallationKey>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.repairs_applied > 0
            || !self.promoted.is_empty()
            || !self.removed.is_empty()
            || !self.errored.is_empty()
    }
}

pub struct Reconciler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run one pass.
    pub async fn reconcile_once(&self) -> OrchestratorResult<ReconcileReport> {
        let orch = &self.orchestrator;
        let mut report = ReconcileReport {
            repairs_applied: orch.retry_repairs(),
            ..ReconcileReport::default()
        };
        report.repairs_pending = orch.pending_repairs();

        let releases = match orch.driver().list_releases().await {
            Ok(releases) => releases,
            Err(e) => {
                warn!(error = %e, "cannot list releases, skipping cluster checks");
                return Ok(report);
            }
        };
        let by_name: HashMap<(&str, &str), &ReleaseInfo> = releases
            .iter()
            .map(|r| ((r.namespace.as_str(), r.name.as_str()), r))
            .collect();

        let records = orch.store().list_installations()?;
        for record in &records {
            let release = by_name
                .get(&(record.namespace.as_str(), record.release_name.as_str()))
                .copied();
            match record.status {
                status if status.is_transient() => {
                    self.resolve_stale(record, release, &mut report)?;
                }
                InstallationStatus::Installed if release.is_none() => {
                    warn!(
                        owner = %record.owner_username,
                        service = %record.service_key,
                        namespace = %record.namespace,
                        release = %record.release_name,
                        "installed release is missing from the cluster"
                    );
                    report.missing.push(record.key());
                }
                _ => {}
            }
        }

        let tenant_prefix = format!("{}-", orch.settings().namespace_prefix);
        let known: HashSet<(&str, &str)> = records
            .iter()
            .map(|r| (r.namespace.as_str(), r.release_name.as_str()))
            .collect();
        for release in &releases {
            if release.namespace.starts_with(&tenant_prefix)
                && !known.contains(&(release.namespace.as_str(), release.name.as_str()))
            {
                warn!(
                    namespace = %release.namespace,
                    release = %release.name,
                    status = %release.status,
                    "orphan release without installation record"
                );
                report.orphans.push(release.clone());
            }
        }

        if report.changed() {
            info!(
                repairs = report.repairs_applied,
                promoted = report.promoted.len(),
                removed = report.removed.len(),
                errored = report.errored.len(),
                "reconciliation applied changes"
            );
        } else {
            debug!(
                orphans = report.orphans.len(),
                missing = report.missing.len(),
                "reconciliation pass clean"
            );
        }
        Ok(report)
    }

    /// Settle a transient record that no operation owns.
    fn resolve_stale(
        &self,
        listed: &InstallationRecord,
        release: Option<&ReleaseInfo>,
        report: &mut ReconcileReport,
    ) -> OrchestratorResult<()> {
        let orch = &self.orchestrator;
        let key = listed.key();
        let Some(_claim) = orch.try_claim(&key) else {
            return Ok(());
        };
        // Re-read under the claim; the listed copy may be stale.
        let Some(record) = orch.store().find_installation(key.owner_id, &key.service_key)? else {
            return Ok(());
        };

        match (record.status, release) {
            (InstallationStatus::Installing, Some(release)) if release.is_deployed() => {
                orch.store().transition_installation(
                    &key,
                    &[InstallationStatus::Installing],
                    InstallationStatus::Installed,
                    None,
                )?;
                warn!(%key, "interrupted install finished on the cluster, marked installed");
                orch.record_event(&key, EventKind::Reconciled, Some("installed".to_string()));
                report.promoted.push(key);
            }
            (InstallationStatus::Installing, Some(release)) => {
                // A failed or pending release still holds its resources.
                let cause = format!("install interrupted, release is {}", release.status);
                orch.store().transition_installation(
                    &key,
                    &[InstallationStatus::Installing],
                    InstallationStatus::Errored,
                    Some(cause),
                )?;
                warn!(
                    %key,
                    release_status = %release.status,
                    "interrupted install left an unfinished release, marked errored"
                );
                orch.record_event(&key, EventKind::Reconciled, Some("errored".to_string()));
                report.errored.push(key);
            }
            (InstallationStatus::Installing | InstallationStatus::Uninstalling, None) => {
                orch.store().delete_installation(&key)?;
                orch.ports().release(&key);
                warn!(%key, status = %record.status, "interrupted operation left no release, record removed");
                orch.record_event(&key, EventKind::Reconciled, Some("removed".to_string()));
                report.removed.push(key);
            }
            (InstallationStatus::Uninstalling, Some(_)) => {
                orch.store().transition_installation(
                    &key,
                    &[InstallationStatus::Uninstalling],
                    InstallationStatus::Errored,
                    Some("uninstall interrupted".to_string()),
                )?;
                warn!(%key, "interrupted uninstall left the release behind, marked errored");
                orch.record_event(&key, EventKind::Reconciled, Some("errored".to_string()));
                report.errored.push(key);
            }
            _ => {}
        }
        Ok(())
    }

    /// Reconcile every `interval` until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "reconciliation pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}
