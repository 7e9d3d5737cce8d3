//! seedling-orchestrator — the installation lifecycle engine.
//!
//! The [`Orchestrator`] owns the install and uninstall state machine for
//! every (owner, service) pair:
//!
//! ```text
//! Absent → Installing → Installed → Uninstalling → Absent
//!              │                         │
//!              └─ driver failure → Absent └─ driver failure → Errored
//! ```
//!
//! Uniqueness comes from the registry: a reservation record is written in
//! one redb transaction before any port is taken or any driver call starts.
//! Ports come from the [`PortAllocator`]. The [`Reconciler`] settles records
//! left transient by cancelled or crashed operations.

pub mod error;
pub mod orchestrator;
pub mod port;
pub mod reconcile;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{
    InFlightGuard, InstallTicket, Orchestrator, OrchestratorSettings, UninstallTicket,
};
pub use port::{PortAllocator, PortError};
pub use reconcile::{ReconcileReport, Reconciler};
