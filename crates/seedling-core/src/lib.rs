//! seedling-core — shared domain types for Seedling.
//!
//! The catalog is loaded once at startup and never mutated afterwards.
//! Everything in this crate is synchronous and free of I/O except the
//! file loaders on [`Catalog`] and [`SeedlingConfig`].

pub mod catalog;
pub mod chart;
pub mod config;
pub mod release;
pub mod tenant;
pub mod values;

pub use catalog::{
    Catalog, CatalogError, CatalogResult, Manager, PortRange, ServiceDefinition, ValueMapping,
    ValueTarget,
};
pub use chart::ChartRef;
pub use config::SeedlingConfig;
pub use release::ReleaseNameFormat;
pub use tenant::{InstallationKey, Owner};
pub use values::{
    ManagedValues, ResolveError, ResolvedValues, ScalarAssignment, StructuredAssignment, resolve,
};
