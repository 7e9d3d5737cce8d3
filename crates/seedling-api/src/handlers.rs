//! Catalog, installation, and event handlers.
//!
//! Install and uninstall run their synchronous half in the request. The
//! driver half either runs inline (blocking mode) or in a spawned task whose
//! outcome is observed by polling `GET /v1/services/installed/{name}`.

use std::collections::HashSet;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use seedling_core::Catalog;
use seedling_core::catalog::Link;
use seedling_state::{InstallationEvent, InstallationRecord, InstallationStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResponse};
use crate::{ApiState, AuthUser};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 500;

// ── Views ──────────────────────────────────────────────────────────

/// Catalog entry as shown to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub key: String,
    pub name: String,
    pub description: String,
    pub project_url: String,
    pub links: Vec<Link>,
    pub icon: String,
    pub tags: Vec<String>,
    pub is_installed: bool,
}

/// Installation joined with its catalog metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationView {
    pub key: String,
    pub name: String,
    pub description: String,
    pub status: InstallationStatus,
    pub namespace: String,
    pub release_name: String,
    pub port: Option<u16>,
    pub live_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl InstallationView {
    fn new(catalog: &Catalog, record: &InstallationRecord) -> Self {
        // A service dropped from the catalog still shows its installations.
        let (name, description) = match catalog.lookup(&record.service_key) {
            Ok(def) => (def.name.clone(), def.description.clone()),
            Err(_) => (record.service_key.clone(), String::new()),
        };
        Self {
            key: record.service_key.clone(),
            name,
            description,
            status: record.status,
            namespace: record.namespace.clone(),
            release_name: record.release_name.clone(),
            port: record.port,
            live_url: record.live_url.clone(),
            last_error: record.last_error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn service_info(catalog: &Catalog, key: &str, installed: bool) -> Option<ServiceInfo> {
    let def = catalog.lookup(key).ok()?;
    Some(ServiceInfo {
        key: def.key.clone(),
        name: def.name.clone(),
        description: def.description.clone(),
        project_url: def.project_url.clone(),
        links: def.links.clone(),
        icon: def.icon.clone(),
        tags: def.tags.clone(),
        is_installed: installed,
    })
}

/// GET /
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

// ── Catalog ────────────────────────────────────────────────────────

/// GET /v1/services/info
pub async fn list_services(
    State(state): State<ApiState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let orch = &state.orchestrator;
    let installed: HashSet<String> = orch
        .installations(user.owner.id)?
        .into_iter()
        .map(|r| r.service_key)
        .collect();
    let services: Vec<ServiceInfo> = orch
        .catalog()
        .services()
        .filter_map(|def| service_info(orch.catalog(), &def.key, installed.contains(&def.key)))
        .collect();
    Ok(ApiResponse::ok(services))
}

/// GET /v1/services/info/{name}
pub async fn get_service_info(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = &state.orchestrator;
    let installed = orch
        .store()
        .find_installation(user.owner.id, &name)?
        .is_some();
    let info = service_info(orch.catalog(), &name, installed)
        .ok_or_else(|| ApiError::NotFound(format!("service {name} not found")))?;
    Ok(ApiResponse::ok(info))
}

// ── Installations ──────────────────────────────────────────────────

/// GET /v1/services/installed
pub async fn list_installed(
    State(state): State<ApiState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let orch = &state.orchestrator;
    let views: Vec<InstallationView> = orch
        .installations(user.owner.id)?
        .iter()
        .map(|r| InstallationView::new(orch.catalog(), r))
        .collect();
    Ok(ApiResponse::ok(views))
}

/// GET /v1/services/installed/{name}
pub async fn get_installed(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let orch = &state.orchestrator;
    let record = orch.installation(user.owner.id, &name)?;
    Ok(ApiResponse::ok(InstallationView::new(orch.catalog(), &record)))
}

/// Install request body. `key` is accepted as an alias of `name`.
#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    #[serde(alias = "key")]
    pub name: String,
}

/// POST /v1/services/install
pub async fn install_service(
    State(state): State<ApiState>,
    user: AuthUser,
    Json(req): Json<InstallRequest>,
) -> Result<Response, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("service name is required".to_string()));
    }

    let orch = state.orchestrator.clone();
    let ticket = orch.begin_install(&user.owner, name)?;

    if state.blocking_operations {
        let record = orch.complete_install(ticket).await?;
        let view = InstallationView::new(orch.catalog(), &record);
        return Ok((StatusCode::OK, ApiResponse::ok(view)).into_response());
    }

    let accepted = InstallationView::new(orch.catalog(), ticket.record());
    let shutdown = state.shutdown.clone();
    let key = ticket.record().key();
    tokio::spawn(async move {
        tokio::select! {
            result = orch.complete_install(ticket) => {
                if let Err(e) = result {
                    debug!(%key, error = %e, "background install finished with error");
                }
            }
            _ = shutdown_signal(shutdown) => {
                warn!(%key, "background install cancelled by shutdown");
            }
        }
    });
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(accepted)).into_response())
}

/// POST /v1/services/uninstall/{name}
pub async fn uninstall_service(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let orch = state.orchestrator.clone();
    let ticket = orch.begin_uninstall(&user.owner, &name)?;

    if state.blocking_operations {
        let record = orch.complete_uninstall(ticket).await?;
        let view = InstallationView::new(orch.catalog(), &record);
        return Ok((StatusCode::OK, ApiResponse::ok(view)).into_response());
    }

    let accepted = InstallationView::new(orch.catalog(), ticket.record());
    let shutdown = state.shutdown.clone();
    let key = ticket.record().key();
    tokio::spawn(async move {
        tokio::select! {
            result = orch.complete_uninstall(ticket) => {
                if let Err(e) = result {
                    debug!(%key, error = %e, "background uninstall finished with error");
                }
            }
            _ = shutdown_signal(shutdown) => {
                warn!(%key, "background uninstall cancelled by shutdown");
            }
        }
    });
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(accepted)).into_response())
}

/// Resolves once shutdown is signalled. Never resolves without a receiver
/// or after the sender is gone.
async fn shutdown_signal(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /v1/events
pub async fn list_events(
    State(state): State<ApiState>,
    user: AuthUser,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events: Vec<InstallationEvent> = state.orchestrator.events(user.owner.id, limit)?;
    Ok(ApiResponse::ok(events))
}
