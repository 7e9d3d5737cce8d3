//! seedling-state — embedded state store for Seedling.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the installation registry,
//! user accounts, and the lifecycle event log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Installations are keyed `{owner_id}/{service_key}`, so the uniqueness of
//! (owner, service) is the uniqueness of the table key. Every
//! check-then-write sequence runs inside a single write transaction; redb
//! serializes write transactions, which makes those sequences atomic.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
