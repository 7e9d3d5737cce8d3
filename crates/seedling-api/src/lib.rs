//! seedling-api — REST API for Seedling.
//!
//! Provides axum route handlers for accounts, the service catalog, and
//! per-tenant installations. Every route except the liveness check, account
//! creation, and login requires `Authorization: Bearer <token>`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Liveness check |
//! | POST | `/v1/users` | Create an account |
//! | POST | `/v1/users/login` | Exchange credentials for a token |
//! | GET | `/v1/users` | Caller's profile |
//! | GET | `/v1/services/info` | Catalog listing with `is_installed` |
//! | GET | `/v1/services/info/{name}` | One catalog entry |
//! | GET | `/v1/services/installed` | Caller's installations |
//! | GET | `/v1/services/installed/{name}` | One installation |
//! | POST | `/v1/services/install` | Install a service (`{"name": …}`) |
//! | POST | `/v1/services/uninstall/{name}` | Uninstall a service |
//! | GET | `/v1/events` | Caller's lifecycle events, newest first |
//!
//! Install and uninstall answer `202 Accepted` with the transient record and
//! finish in a background task, unless blocking operations are enabled, in
//! which case they answer `200` with the final record.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod password;
pub mod user_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use seedling_orchestrator::Orchestrator;
use tokio::sync::watch;

pub use auth::{AuthUser, Claims, TokenError, TokenIssuer};
pub use error::{ApiError, ApiResponse};
pub use password::PasswordHasher;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub tokens: Arc<TokenIssuer>,
    pub passwords: PasswordHasher,
    /// Await driver completion inside the request.
    pub blocking_operations: bool,
    /// Background operations are dropped (and their helm children killed)
    /// when this flips to `true`.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, tokens: TokenIssuer, passwords: PasswordHasher) -> Self {
        Self {
            orchestrator,
            tokens: Arc::new(tokens),
            passwords,
            blocking_operations: false,
            shutdown: None,
        }
    }

    pub fn with_blocking_operations(mut self, blocking: bool) -> Self {
        self.blocking_operations = blocking;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let v1 = Router::new()
        .route(
            "/users",
            post(user_handlers::create_user).get(user_handlers::current_user),
        )
        .route("/users/login", post(user_handlers::login))
        .route("/services/info", get(handlers::list_services))
        .route("/services/info/{name}", get(handlers::get_service_info))
        .route("/services/installed", get(handlers::list_installed))
        .route("/services/installed/{name}", get(handlers::get_installed))
        .route("/services/install", post(handlers::install_service))
        .route("/services/uninstall/{name}", post(handlers::uninstall_service))
        .route("/events", get(handlers::list_events));

    Router::new()
        .route("/", get(handlers::liveness))
        .nest("/v1", v1)
        .with_state(state)
}
