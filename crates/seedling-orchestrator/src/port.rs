//! Port allocation over the catalog's configured range.
//!
//! Ports are tracked in an explicit table keyed by installation identity.
//! The table and the free set change together under one mutex, and nothing
//! awaits while it is held.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use seedling_core::{InstallationKey, PortRange};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port in {start}..={end}")]
    Exhausted { start: u16, end: u16 },

    #[error("no port range configured")]
    Unconfigured,

    #[error("port {port} is outside {start}..={end}")]
    OutOfRange { port: u16, start: u16, end: u16 },

    #[error("port {port} is already held by {holder}")]
    Taken { port: u16, holder: InstallationKey },
}

#[derive(Debug, Default)]
struct PortTable {
    free: BTreeSet<u16>,
    by_key: HashMap<InstallationKey, u16>,
}

#[derive(Debug)]
pub struct PortAllocator {
    range: Option<PortRange>,
    table: Mutex<PortTable>,
}

impl PortAllocator {
    /// An allocator over `range`; `None` makes every acquire fail.
    pub fn new(range: Option<PortRange>) -> Self {
        let free = range
            .map(|r| (r.start_port..=r.end_port).collect())
            .unwrap_or_default();
        Self {
            range,
            table: Mutex::new(PortTable {
                free,
                by_key: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn range(&self) -> Option<PortRange> {
        self.range
    }

    /// Hand out the lowest free port to `key`. A key that already holds a
    /// port gets the same port back.
    pub fn acquire(&self, key: &InstallationKey) -> Result<u16, PortError> {
        let range = self.range.ok_or(PortError::Unconfigured)?;
        let mut table = self.lock();
        if let Some(&port) = table.by_key.get(key) {
            return Ok(port);
        }
        let port = table.free.pop_first().ok_or(PortError::Exhausted {
            start: range.start_port,
            end: range.end_port,
        })?;
        table.by_key.insert(key.clone(), port);
        debug!(%key, port, "port acquired");
        Ok(port)
    }

    /// Return `key`'s port to the pool. No-op if it holds none.
    pub fn release(&self, key: &InstallationKey) -> Option<u16> {
        let mut table = self.lock();
        let port = table.by_key.remove(key)?;
        table.free.insert(port);
        debug!(%key, port, "port released");
        Some(port)
    }

    /// Re-register an allocation recorded before a restart.
    pub fn restore(&self, key: &InstallationKey, port: u16) -> Result<(), PortError> {
        let range = self.range.ok_or(PortError::Unconfigured)?;
        if !range.contains(port) {
            return Err(PortError::OutOfRange {
                port,
                start: range.start_port,
                end: range.end_port,
            });
        }
        let mut table = self.lock();
        if table.by_key.get(key) == Some(&port) {
            return Ok(());
        }
        if let Some((holder, _)) = table.by_key.iter().find(|&(_, &p)| p == port) {
            return Err(PortError::Taken {
                port,
                holder: holder.clone(),
            });
        }
        if let Some(previous) = table.by_key.insert(key.clone(), port) {
            table.free.insert(previous);
        }
        table.free.remove(&port);
        Ok(())
    }

    pub fn allocated(&self, key: &InstallationKey) -> Option<u16> {
        self.lock().by_key.get(key).copied()
    }

    /// Number of free ports.
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn key(owner_id: u64, service: &str) -> InstallationKey {
        InstallationKey::new(owner_id, service)
    }

    #[test]
    fn hands_out_lowest_free_port() {
        let ports = PortAllocator::new(Some(PortRange::new(30000, 30002)));
        assert_eq!(ports.acquire(&key(1, "a")).unwrap(), 30000);
        assert_eq!(ports.acquire(&key(1, "b")).unwrap(), 30001);

        ports.release(&key(1, "a"));
        assert_eq!(ports.acquire(&key(2, "a")).unwrap(), 30000);
        assert_eq!(ports.available(), 1);
    }

    #[test]
    fn acquire_is_idempotent_per_key() {
        let ports = PortAllocator::new(Some(PortRange::new(30000, 30002)));
        let first = ports.acquire(&key(1, "a")).unwrap();
        assert_eq!(ports.acquire(&key(1, "a")).unwrap(), first);
        assert_eq!(ports.available(), 2);
    }

    #[test]
    fn exhaustion() {
        let ports = PortAllocator::new(Some(PortRange::new(30000, 30000)));
        ports.acquire(&key(1, "a")).unwrap();
        assert_eq!(
            ports.acquire(&key(1, "b")),
            Err(PortError::Exhausted {
                start: 30000,
                end: 30000
            })
        );
    }

    #[test]
    fn release_without_allocation_is_noop() {
        let ports = PortAllocator::new(Some(PortRange::new(30000, 30001)));
        assert_eq!(ports.release(&key(1, "a")), None);
        assert_eq!(ports.available(), 2);
    }

    #[test]
    fn unconfigured_range() {
        let ports = PortAllocator::new(None);
        assert_eq!(ports.acquire(&key(1, "a")), Err(PortError::Unconfigured));
    }

    #[test]
    fn restore_rebuilds_table() {
        let ports = PortAllocator::new(Some(PortRange::new(30000, 30005)));
        ports.restore(&key(1, "a"), 30000).unwrap();
        ports.restore(&key(2, "b"), 30003).unwrap();
        ports.restore(&key(2, "b"), 30003).unwrap();

        assert_eq!(ports.allocated(&key(2, "b")), Some(30003));
        assert_eq!(ports.acquire(&key(3, "c")).unwrap(), 30001);
        assert!(matches!(
            ports.restore(&key(4, "d"), 30003),
            Err(PortError::Taken { port: 30003, .. })
        ));
        assert!(matches!(
            ports.restore(&key(4, "d"), 40000),
            Err(PortError::OutOfRange { .. })
        ));
    }

    #[test]
    fn concurrent_acquisitions_never_share_a_port() {
        let ports = Arc::new(PortAllocator::new(Some(PortRange::new(30000, 30099))));
        let handles: Vec<_> = (0..100u64)
            .map(|i| {
                let ports = Arc::clone(&ports);
                std::thread::spawn(move || ports.acquire(&key(i, "svc")).unwrap())
            })
            .collect();

        let assigned: HashSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(assigned.len(), 100);
        assert_eq!(ports.available(), 0);
        assert!(ports.acquire(&key(500, "svc")).is_err());

        ports.release(&key(42, "svc"));
        assert!(ports.acquire(&key(500, "svc")).is_ok());
    }
}
