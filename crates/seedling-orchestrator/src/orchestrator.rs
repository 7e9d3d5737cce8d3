//! Install and uninstall lifecycle for (owner, service) pairs.
//!
//! Both operations are split in two. `begin_*` validates the request and
//! takes the registry record into a transient state; it never waits on the
//! cluster. `complete_*` runs the driver call and writes the final state.
//! The returned ticket carries an in-flight claim on the installation key
//! that is released when the ticket is dropped, whether or not the
//! operation finished.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use seedling_core::{
    Catalog, InstallationKey, ManagedValues, Manager, Owner, SeedlingConfig, resolve,
};
use seedling_driver::{DeploymentDriver, DriverError, InstallRequest};
use seedling_state::{
    EventKind, InstallationEvent, InstallationRecord, InstallationStatus, StateError, StateStore,
    UserId, epoch_secs,
};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::port::{PortAllocator, PortError};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Tenant namespaces are `{namespace_prefix}-{username}`.
    pub namespace_prefix: String,
    pub install_timeout: Duration,
    pub uninstall_timeout: Duration,
    /// Host part of generated access points.
    pub access_host: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SeedlingConfig) -> Self {
        Self {
            namespace_prefix: config.cluster.namespace_prefix.clone(),
            install_timeout: config.cluster.install_timeout(),
            uninstall_timeout: config.cluster.uninstall_timeout(),
            access_host: config.cluster.access_host.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            namespace_prefix: "seedling".to_string(),
            install_timeout: Duration::from_secs(300),
            uninstall_timeout: Duration::from_secs(300),
            access_host: String::new(),
        }
    }
}

// ── In-flight tracking ─────────────────────────────────────────────

type InFlightSet = Arc<Mutex<HashSet<InstallationKey>>>;

fn lock_set(set: &InFlightSet) -> MutexGuard<'_, HashSet<InstallationKey>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on an installation key. Released on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    key: InstallationKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.key);
    }
}

// ── Tickets ────────────────────────────────────────────────────────

/// A reserved install waiting for its driver call.
#[derive(Debug)]
pub struct InstallTicket {
    owner: Owner,
    record: InstallationRecord,
    request: InstallRequest,
    _claim: InFlightGuard,
}

impl InstallTicket {
    /// The reservation as persisted: status `installing`, port assigned.
    pub fn record(&self) -> &InstallationRecord {
        &self.record
    }
}

/// An installation moved to `uninstalling`, waiting for its driver call.
#[derive(Debug)]
pub struct UninstallTicket {
    owner: Owner,
    record: InstallationRecord,
    _claim: InFlightGuard,
}

impl UninstallTicket {
    pub fn record(&self) -> &InstallationRecord {
        &self.record
    }
}

// ── Repairs ────────────────────────────────────────────────────────

/// A registry write that failed after the cluster already changed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Repair {
    MarkInstalled(InstallationKey),
    MarkErrored { key: InstallationKey, error: String },
    Remove(InstallationKey),
}

impl Repair {
    fn key(&self) -> &InstallationKey {
        match self {
            Repair::MarkInstalled(key) | Repair::Remove(key) => key,
            Repair::MarkErrored { key, .. } => key,
        }
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

pub struct Orchestrator {
    catalog: Arc<Catalog>,
    store: StateStore,
    driver: Arc<dyn DeploymentDriver>,
    ports: PortAllocator,
    settings: OrchestratorSettings,
    in_flight: InFlightSet,
    repairs: Mutex<Vec<Repair>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        store: StateStore,
        driver: Arc<dyn DeploymentDriver>,
        settings: OrchestratorSettings,
    ) -> Self {
        let ports = PortAllocator::new(catalog.port_range());
        Self {
            catalog,
            store,
            driver,
            ports,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            repairs: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub(crate) fn driver(&self) -> &dyn DeploymentDriver {
        self.driver.as_ref()
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Rebuild the port table from persisted installations. Returns the
    /// number of ports restored.
    pub fn restore_allocations(&self) -> OrchestratorResult<usize> {
        let mut restored = 0;
        for record in self.store.list_installations()? {
            let Some(port) = record.port else { continue };
            match self.ports.restore(&record.key(), port) {
                Ok(()) => restored += 1,
                Err(e) => warn!(
                    key = %record.key(),
                    port,
                    error = %e,
                    "cannot restore port allocation"
                ),
            }
        }
        info!(restored, available = self.ports.available(), "port allocations restored");
        Ok(restored)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn installation(
        &self,
        owner_id: UserId,
        service_key: &str,
    ) -> OrchestratorResult<InstallationRecord> {
        self.store
            .find_installation(owner_id, service_key)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("installation {service_key}")))
    }

    pub fn installations(&self, owner_id: UserId) -> OrchestratorResult<Vec<InstallationRecord>> {
        Ok(self.store.list_installations_for_owner(owner_id)?)
    }

    pub fn events(&self, owner_id: UserId, limit: usize) -> OrchestratorResult<Vec<InstallationEvent>> {
        Ok(self.store.list_events_for_owner(owner_id, limit)?)
    }

    pub fn is_in_flight(&self, key: &InstallationKey) -> bool {
        lock_set(&self.in_flight).contains(key)
    }

    /// Claim `key` for one operation; `None` if another operation holds it.
    pub(crate) fn try_claim(&self, key: &InstallationKey) -> Option<InFlightGuard> {
        if !lock_set(&self.in_flight).insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: key.clone(),
        })
    }

    // ── Install ────────────────────────────────────────────────────

    /// Install `service_key` for `owner` and wait for the driver.
    pub async fn install(
        &self,
        owner: &Owner,
        service_key: &str,
    ) -> OrchestratorResult<InstallationRecord> {
        let ticket = self.begin_install(owner, service_key)?;
        self.complete_install(ticket).await
    }

    /// Validate and reserve. No driver call happens here.
    pub fn begin_install(&self, owner: &Owner, service_key: &str) -> OrchestratorResult<InstallTicket> {
        let definition = self
            .catalog
            .lookup(service_key)
            .map_err(|_| OrchestratorError::NotFound(format!("service {service_key}")))?;
        let namespace = owner
            .namespace(&self.settings.namespace_prefix)
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;
        let release_name = definition
            .template
            .release_name
            .render(&definition.key, owner)
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;

        let key = InstallationKey::new(owner.id, definition.key.clone());
        let claim = self.try_claim(&key).ok_or_else(|| {
            OrchestratorError::Conflict(format!("an operation on {} is in progress", definition.key))
        })?;

        let now = epoch_secs();
        let mut record = InstallationRecord {
            owner_id: owner.id,
            owner_username: owner.username.clone(),
            service_key: definition.key.clone(),
            namespace,
            release_name,
            port: None,
            live_url: None,
            status: InstallationStatus::Installing,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        match self.store.create_installation(&record) {
            Ok(()) => {}
            Err(StateError::Conflict(_)) => {
                return Err(OrchestratorError::Conflict(format!(
                    "{} already has an installation of {}",
                    owner.username, definition.key
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let mut managed = ManagedValues::new();
        if definition.requires(Manager::PortAllocator) {
            let port = match self.ports.acquire(&key) {
                Ok(port) => port,
                Err(e) => {
                    self.abandon(&key);
                    return Err(match e {
                        PortError::Exhausted { .. } => OrchestratorError::PortExhausted(e.to_string()),
                        other => OrchestratorError::InvalidRequest(other.to_string()),
                    });
                }
            };
            managed.insert(Manager::PortAllocator, port.to_string());
            record.port = Some(port);
            record.live_url = Some(format!("{}:{port}", self.settings.access_host));
        }

        let values = match resolve(definition, &managed) {
            Ok(values) => values,
            Err(e) => {
                self.abandon(&key);
                return Err(e.into());
            }
        };

        if record.port.is_some() {
            if let Err(e) = self.store.put_installation(&record) {
                self.abandon(&key);
                return Err(e.into());
            }
        }

        info!(
            owner = %owner.username,
            service = %definition.key,
            namespace = %record.namespace,
            release = %record.release_name,
            port = ?record.port,
            "install reserved"
        );

        let request = InstallRequest {
            namespace: record.namespace.clone(),
            release_name: record.release_name.clone(),
            chart: definition.template.chart.clone(),
            chart_version: definition.template.chart_version.clone(),
            values,
            timeout: self.settings.install_timeout,
        };
        Ok(InstallTicket {
            owner: owner.clone(),
            record,
            request,
            _claim: claim,
        })
    }

    /// Run the driver install for a reservation and record the outcome.
    pub async fn complete_install(&self, ticket: InstallTicket) -> OrchestratorResult<InstallationRecord> {
        let key = ticket.record.key();

        if let Err(e) = self.driver.install(&ticket.request).await {
            error!(
                owner = %ticket.owner.username,
                service = %key.service_key,
                namespace = %ticket.record.namespace,
                release = %ticket.record.release_name,
                error = %e,
                "install failed"
            );
            self.abandon(&key);
            self.record_event(&key, EventKind::InstallFailed, Some(e.to_string()));
            return Err(OrchestratorError::Driver {
                owner: ticket.owner.username.clone(),
                service: key.service_key.clone(),
                source: e,
            });
        }

        match self.store.transition_installation(
            &key,
            &[InstallationStatus::Installing],
            InstallationStatus::Installed,
            None,
        ) {
            Ok(record) => {
                info!(
                    owner = %ticket.owner.username,
                    service = %key.service_key,
                    port = ?record.port,
                    "installed"
                );
                self.record_event(&key, EventKind::Installed, record.live_url.clone());
                Ok(record)
            }
            Err(e) => {
                error!(
                    owner = %ticket.owner.username,
                    service = %key.service_key,
                    error = %e,
                    "release deployed but registry update failed"
                );
                self.queue_repair(Repair::MarkInstalled(key));
                Err(e.into())
            }
        }
    }

    /// Drop a reservation and its port after a failed install. The port
    /// stays held while the record does; a queued `Remove` frees both.
    fn abandon(&self, key: &InstallationKey) {
        let deleted = self.store.delete_installation(key);
        self.settle_abandoned(key, deleted);
    }

    fn settle_abandoned(&self, key: &InstallationKey, deleted: Result<bool, StateError>) {
        match deleted {
            Ok(_) => {
                self.ports.release(key);
            }
            Err(e) => {
                error!(%key, error = %e, "cannot remove failed reservation");
                self.queue_repair(Repair::Remove(key.clone()));
            }
        }
    }

    // ── Uninstall ──────────────────────────────────────────────────

    /// Uninstall `service_key` for `owner` and wait for the driver.
    pub async fn uninstall(
        &self,
        owner: &Owner,
        service_key: &str,
    ) -> OrchestratorResult<InstallationRecord> {
        let ticket = self.begin_uninstall(owner, service_key)?;
        self.complete_uninstall(ticket).await
    }

    /// Move an installed (or errored) installation to `uninstalling`.
    pub fn begin_uninstall(
        &self,
        owner: &Owner,
        service_key: &str,
    ) -> OrchestratorResult<UninstallTicket> {
        let existing = self.installation(owner.id, service_key)?;
        let key = existing.key();
        let claim = self.try_claim(&key).ok_or_else(|| {
            OrchestratorError::Conflict(format!("an operation on {service_key} is in progress"))
        })?;

        let record = self
            .store
            .transition_installation(
                &key,
                &[InstallationStatus::Installed, InstallationStatus::Errored],
                InstallationStatus::Uninstalling,
                None,
            )
            .map_err(|e| match e {
                StateError::NotFound(_) => {
                    OrchestratorError::NotFound(format!("installation {service_key}"))
                }
                StateError::StatusMismatch { current, .. } => {
                    OrchestratorError::Conflict(format!("{service_key} is {current}"))
                }
                other => other.into(),
            })?;

        info!(
            owner = %owner.username,
            service = %service_key,
            namespace = %record.namespace,
            release = %record.release_name,
            "uninstall started"
        );
        Ok(UninstallTicket {
            owner: owner.clone(),
            record,
            _claim: claim,
        })
    }

    /// Run the driver uninstall and remove the record on success.
    ///
    /// A release the driver no longer knows counts as removed.
    pub async fn complete_uninstall(
        &self,
        ticket: UninstallTicket,
    ) -> OrchestratorResult<InstallationRecord> {
        let record = ticket.record;
        let key = record.key();

        let outcome = self
            .driver
            .uninstall(
                &record.namespace,
                &record.release_name,
                self.settings.uninstall_timeout,
            )
            .await;
        match outcome {
            Ok(()) => {}
            Err(DriverError::ReleaseNotFound { .. }) => {
                warn!(
                    owner = %ticket.owner.username,
                    service = %key.service_key,
                    release = %record.release_name,
                    "release already gone, removing record"
                );
            }
            Err(e) => {
                error!(
                    owner = %ticket.owner.username,
                    service = %key.service_key,
                    namespace = %record.namespace,
                    release = %record.release_name,
                    error = %e,
                    "uninstall failed"
                );
                if let Err(state_err) = self.store.transition_installation(
                    &key,
                    &[InstallationStatus::Uninstalling],
                    InstallationStatus::Errored,
                    Some(e.to_string()),
                ) {
                    error!(%key, error = %state_err, "cannot mark installation errored");
                    self.queue_repair(Repair::MarkErrored {
                        key: key.clone(),
                        error: e.to_string(),
                    });
                }
                self.record_event(&key, EventKind::UninstallFailed, Some(e.to_string()));
                return Err(OrchestratorError::Driver {
                    owner: ticket.owner.username.clone(),
                    service: key.service_key.clone(),
                    source: e,
                });
            }
        }

        if let Err(e) = self.store.delete_installation(&key) {
            error!(
                owner = %ticket.owner.username,
                service = %key.service_key,
                error = %e,
                "release removed but registry delete failed"
            );
            self.queue_repair(Repair::Remove(key));
            return Err(e.into());
        }
        self.ports.release(&key);
        info!(owner = %ticket.owner.username, service = %key.service_key, "uninstalled");
        self.record_event(&key, EventKind::Uninstalled, None);
        Ok(record)
    }

    // ── Events & repairs ───────────────────────────────────────────

    pub(crate) fn record_event(&self, key: &InstallationKey, kind: EventKind, detail: Option<String>) {
        let event = InstallationEvent {
            owner_id: key.owner_id,
            service_key: key.service_key.clone(),
            kind,
            detail,
            at: epoch_secs(),
        };
        if let Err(e) = self.store.append_event(&event) {
            warn!(%key, error = %e, "cannot record lifecycle event");
        }
    }

    fn lock_repairs(&self) -> MutexGuard<'_, Vec<Repair>> {
        self.repairs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_repair(&self, repair: Repair) {
        debug!(key = %repair.key(), ?repair, "repair queued");
        self.lock_repairs().push(repair);
    }

    pub fn pending_repairs(&self) -> usize {
        self.lock_repairs().len()
    }

    fn apply_repair(&self, repair: &Repair) -> Result<(), StateError> {
        match repair {
            Repair::MarkInstalled(key) => self
                .store
                .transition_installation(
                    key,
                    &[InstallationStatus::Installing],
                    InstallationStatus::Installed,
                    None,
                )
                .map(|_| ()),
            Repair::MarkErrored { key, error } => self
                .store
                .transition_installation(
                    key,
                    &[InstallationStatus::Uninstalling],
                    InstallationStatus::Errored,
                    Some(error.clone()),
                )
                .map(|_| ()),
            Repair::Remove(key) => {
                self.store.delete_installation(key)?;
                self.ports.release(key);
                Ok(())
            }
        }
    }

    /// Retry queued registry repairs. Returns how many were applied.
    pub(crate) fn retry_repairs(&self) -> usize {
        let pending = std::mem::take(&mut *self.lock_repairs());
        let mut remaining = Vec::new();
        let mut applied = 0;

        for repair in pending {
            let Some(_claim) = self.try_claim(repair.key()) else {
                remaining.push(repair);
                continue;
            };
            match self.apply_repair(&repair) {
                Ok(()) => {
                    info!(key = %repair.key(), ?repair, "repair applied");
                    applied += 1;
                }
                Err(e) if e.is_logical() => {
                    warn!(key = %repair.key(), ?repair, error = %e, "repair no longer applies");
                }
                Err(e) => {
                    warn!(key = %repair.key(), ?repair, error = %e, "repair failed, will retry");
                    remaining.push(repair);
                }
            }
        }

        self.lock_repairs().extend(remaining);
        applied
    }
}
