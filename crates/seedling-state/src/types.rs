//! Domain types for the Seedling state store.
//!
//! These types represent the persisted installation registry, user
//! accounts, and lifecycle events. All types are serializable to/from JSON
//! for storage in redb tables.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use seedling_core::InstallationKey;
use serde::{Deserialize, Serialize};

/// Unique identifier for a user.
pub type UserId = u64;

// ── Installations ─────────────────────────────────────────────────

/// Lifecycle status of an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    /// Reserved; the driver install has not finished.
    Installing,
    /// The release is deployed.
    Installed,
    /// The driver uninstall has not finished.
    Uninstalling,
    /// The last uninstall failed, or an interrupted install left an
    /// unfinished release; the release may still exist.
    Errored,
}

impl InstallationStatus {
    /// Installing and uninstalling are owned by an in-flight operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InstallationStatus::Installing | InstallationStatus::Uninstalling
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationStatus::Installing => "installing",
            InstallationStatus::Installed => "installed",
            InstallationStatus::Uninstalling => "uninstalling",
            InstallationStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership record linking a tenant, a service, and its allocated resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationRecord {
    pub owner_id: UserId,
    pub owner_username: String,
    pub service_key: String,
    /// Tenant namespace the release lives in.
    pub namespace: String,
    pub release_name: String,
    pub port: Option<u16>,
    /// Generated access point, present when a port is allocated.
    pub live_url: Option<String>,
    pub status: InstallationStatus,
    pub last_error: Option<String>,
    /// Unix timestamp (seconds) when the installation was reserved.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl InstallationRecord {
    pub fn key(&self) -> InstallationKey {
        InstallationKey::new(self.owner_id, self.service_key.clone())
    }

    pub fn table_key(&self) -> String {
        self.key().table_key()
    }
}

// ── Users ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub created_at: u64,
}

/// Input for [`crate::StateStore::create_user`]; the store assigns the ID.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
}

// ── Events ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Installed,
    InstallFailed,
    Uninstalled,
    UninstallFailed,
    Reconciled,
}

/// One entry of the lifecycle event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationEvent {
    pub owner_id: UserId,
    pub service_key: String,
    pub kind: EventKind,
    pub detail: Option<String>,
    /// Unix timestamp (seconds).
    pub at: u64,
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
