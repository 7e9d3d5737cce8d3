//! StateStore — redb-backed state persistence for Seedling.
//!
//! Provides typed operations over installations, users, and lifecycle
//! events. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use seedling_core::InstallationKey;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const NEXT_USER_ID: &str = "next_user_id";
const NEXT_EVENT_SEQ: &str = "next_event_seq";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(USERNAMES).map_err(map_err!(Table))?;
        txn.open_table(EMAILS).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Installations ──────────────────────────────────────────────

    /// Insert a new installation record.
    ///
    /// Fails with [`StateError::Conflict`] if any record exists for the same
    /// (owner, service). The existence check and the insert share one write
    /// transaction.
    pub fn create_installation(&self, record: &InstallationRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %record.status, "installation created");
        Ok(())
    }

    /// Overwrite an existing installation record.
    pub fn put_installation(&self, record: &InstallationRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %record.status, "installation updated");
        Ok(())
    }

    /// Get the installation for (owner, service), if any.
    pub fn find_installation(
        &self,
        owner_id: UserId,
        service_key: &str,
    ) -> StateResult<Option<InstallationRecord>> {
        let key = InstallationKey::new(owner_id, service_key).table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all installations owned by one user.
    pub fn list_installations_for_owner(
        &self,
        owner_id: UserId,
    ) -> StateResult<Vec<InstallationRecord>> {
        let prefix = format!("{owner_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// List every installation.
    pub fn list_installations(&self) -> StateResult<Vec<InstallationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Atomically move an installation from one of `from` to `to`.
    ///
    /// Returns the updated record. Fails with [`StateError::NotFound`] if
    /// there is no record and [`StateError::StatusMismatch`] if its current
    /// status is not in `from`; neither case writes anything.
    pub fn transition_installation(
        &self,
        key: &InstallationKey,
        from: &[InstallationStatus],
        to: InstallationStatus,
        last_error: Option<String>,
    ) -> StateResult<InstallationRecord> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
            let mut record: InstallationRecord = match table
                .get(table_key.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(table_key)),
            };
            if !from.contains(&record.status) {
                return Err(StateError::StatusMismatch {
                    key: table_key,
                    current: record.status,
                    expected: from.to_vec(),
                });
            }
            record.status = to;
            record.last_error = last_error;
            record.updated_at = epoch_secs();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %table_key, status = %to, "installation transitioned");
        Ok(record)
    }

    /// Delete an installation. Returns true if it existed.
    pub fn delete_installation(&self, key: &InstallationKey) -> StateResult<bool> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTALLATIONS).map_err(map_err!(Table))?;
            existed = table
                .remove(table_key.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %table_key, existed, "installation deleted");
        Ok(existed)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Create a user, assigning the next ID.
    ///
    /// Fails with [`StateError::Conflict`] if the username or email (case
    /// insensitive) is taken.
    pub fn create_user(&self, user: NewUser) -> StateResult<UserRecord> {
        let email_key = user.email.to_lowercase();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut usernames = txn.open_table(USERNAMES).map_err(map_err!(Table))?;
            let mut emails = txn.open_table(EMAILS).map_err(map_err!(Table))?;
            if usernames
                .get(user.username.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!("username {}", user.username)));
            }
            if emails
                .get(email_key.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!("email {}", user.email)));
            }

            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let id = counters
                .get(NEXT_USER_ID)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(1);
            counters
                .insert(NEXT_USER_ID, id + 1)
                .map_err(map_err!(Write))?;

            let record = UserRecord {
                id,
                username: user.username,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                password_hash: user.password_hash,
                created_at: epoch_secs(),
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut users = txn.open_table(USERS).map_err(map_err!(Table))?;
            users.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            usernames
                .insert(record.username.as_str(), id)
                .map_err(map_err!(Write))?;
            emails
                .insert(email_key.as_str(), id)
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = record.id, username = %record.username, "user created");
        Ok(record)
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: UserId) -> StateResult<Option<UserRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a user by email (case insensitive).
    pub fn find_user_by_email(&self, email: &str) -> StateResult<Option<UserRecord>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(EMAILS).map_err(map_err!(Table))?;
            let guard = table
                .get(email.to_lowercase().as_str())
                .map_err(map_err!(Read))?;
            guard.map(|g| g.value())
        };
        match id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append a lifecycle event.
    pub fn append_event(&self, event: &InstallationEvent) -> StateResult<()> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let seq = counters
                .get(NEXT_EVENT_SEQ)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            counters
                .insert(NEXT_EVENT_SEQ, seq + 1)
                .map_err(map_err!(Write))?;

            let key = format!("{:020}:{seq:020}", event.owner_id);
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Most recent events for one owner, newest first.
    pub fn list_events_for_owner(
        &self,
        owner_id: UserId,
        limit: usize,
    ) -> StateResult<Vec<InstallationEvent>> {
        // ';' sorts directly after ':', bounding the owner's key range.
        let start = format!("{owner_id:020}:");
        let end = format!("{owner_id:020};");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}
