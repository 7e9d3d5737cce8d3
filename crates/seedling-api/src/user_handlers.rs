//! Account handlers: registration, login, and the caller's profile.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use seedling_core::Owner;
use seedling_core::tenant::is_dns_label;
use seedling_state::{NewUser, UserRecord};
use tracing::info;

use crate::error::{ApiError, ApiResponse};
use crate::{ApiState, AuthUser};

const MIN_PASSWORD_LEN: usize = 8;

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<UserRecord> for Profile {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    pub data: Profile,
}

fn validate_new_user(req: &CreateUserRequest, namespace_prefix: &str) -> Result<(), ApiError> {
    if !is_dns_label(&req.username) {
        return Err(ApiError::BadRequest(format!(
            "username `{}` must be lowercase letters, digits, and '-'",
            req.username
        )));
    }
    if Owner::new(0, req.username.clone())
        .namespace(namespace_prefix)
        .is_err()
    {
        return Err(ApiError::BadRequest(format!(
            "username `{}` is too long",
            req.username
        )));
    }
    let email = req.email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.contains(char::is_whitespace);
    if !valid_email {
        return Err(ApiError::BadRequest(format!("invalid email `{email}`")));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// POST /v1/users
pub async fn create_user(
    State(state): State<ApiState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_new_user(&req, &state.orchestrator.settings().namespace_prefix)?;

    let hasher = state.passwords;
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = state.orchestrator.store().create_user(NewUser {
        username: req.username,
        email: req.email.trim().to_string(),
        first_name: req.first_name,
        last_name: req.last_name,
        password_hash,
    })?;

    info!(id = user.id, username = %user.username, "user created");
    Ok((StatusCode::CREATED, ApiResponse::ok(Profile::from(user))))
}

/// POST /v1/users/login
pub async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("invalid email or password".to_string());

    let user = state
        .orchestrator
        .store()
        .find_user_by_email(req.email.trim())?
        .ok_or_else(invalid)?;

    let hasher = state.passwords;
    let stored = user.password_hash.clone();
    let password = req.password;
    let valid = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !valid {
        return Err(invalid());
    }

    let token = state.tokens.issue(&user)?;
    info!(id = user.id, username = %user.username, "user logged in");
    Ok(Json(LoginResponse {
        ok: true,
        token,
        data: Profile::from(user),
    }))
}

/// GET /v1/users
pub async fn current_user(
    State(state): State<ApiState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .orchestrator
        .store()
        .get_user(user.owner.id)?
        .ok_or_else(|| ApiError::Unauthorized("unknown token subject".to_string()))?;
    Ok(ApiResponse::ok(Profile::from(record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    #[test]
    fn accepts_valid_registration() {
        assert!(validate_new_user(&request("alice", "alice@example.com", "password1"), "seedling").is_ok());
    }

    #[test]
    fn rejects_usernames_that_cannot_name_a_namespace() {
        for username in ["Alice", "al_ice", "-alice", ""] {
            assert!(
                validate_new_user(&request(username, "a@example.com", "password1"), "seedling")
                    .is_err(),
                "{username}"
            );
        }
        let long = "a".repeat(60);
        assert!(validate_new_user(&request(&long, "a@example.com", "password1"), "seedling").is_err());
    }

    #[test]
    fn rejects_bad_email_and_short_password() {
        assert!(validate_new_user(&request("alice", "alice", "password1"), "seedling").is_err());
        assert!(validate_new_user(&request("alice", "a b@example.com", "password1"), "seedling").is_err());
        assert!(validate_new_user(&request("alice", "alice@example.com", "short"), "seedling").is_err());
    }
}
