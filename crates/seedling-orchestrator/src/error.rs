use seedling_core::ResolveError;
use seedling_driver::DriverError;
use seedling_state::StateError;
use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("port pool exhausted: {0}")]
    PortExhausted(String),

    #[error(transparent)]
    UnresolvedManager(#[from] ResolveError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("deployment of {service} for {owner} failed: {source}")]
    Driver {
        owner: String,
        service: String,
        #[source]
        source: DriverError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] StateError),
}
