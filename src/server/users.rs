//! Registration and account management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use super::auth::hash_new_password;
use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery, CurrentUser};
use super::{run_blocking, AppState};
use crate::auth::verify_password;
use crate::db::{NewUser, User, UserChanges};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(register))
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/{id}/password", put(update_password))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    company_name: Option<String>,
    industry: Option<String>,
}

fn check_email(email: &str) -> Result<(), ApiError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation("value is not a valid email address"))
    }
}

fn ensure_self(current: &User, id: &str) -> Result<(), ApiError> {
    if current.id == id {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not enough permissions"))
    }
}

async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_email(&body.email)?;
    let password_hash = hash_new_password(body.password).await?;

    let db = state.db.clone();
    let new_user = NewUser {
        email: body.email,
        password_hash,
        first_name: body.first_name,
        last_name: body.last_name,
        company_name: body.company_name,
        industry: body.industry,
    };
    let created = run_blocking(move || {
        if db.get_user_by_email(&new_user.email)?.is_some() {
            return Ok(None);
        }
        db.create_user(&new_user).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::bad_request("Email already registered"))?;

    tracing::info!(user_id = %created.id, "User registered");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_list_limit")]
    limit: u32,
}

fn default_list_limit() -> u32 {
    100
}

async fn list_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<User>>, ApiError> {
    let db = state.db.clone();
    let users = run_blocking(move || db.list_users(params.skip, params.limit)).await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let db = state.db.clone();
    run_blocking(move || db.get_user(&id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn update_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<UserChanges>,
) -> Result<Json<User>, ApiError> {
    ensure_self(&current, &id)?;
    if let Some(email) = &changes.email {
        check_email(email)?;
    }

    let db = state.db.clone();
    let outcome = run_blocking(move || {
        if let Some(email) = &changes.email {
            if let Some(other) = db.get_user_by_email(email)? {
                if other.id != id {
                    return Ok(Err(ApiError::bad_request("Email already registered")));
                }
            }
        }
        Ok(db
            .update_user(&id, &changes)?
            .ok_or_else(|| ApiError::not_found("User not found")))
    })
    .await??;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct PasswordUpdate {
    current_password: String,
    new_password: String,
}

async fn update_password(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PasswordUpdate>,
) -> Result<StatusCode, ApiError> {
    ensure_self(&current, &id)?;

    let stored = current.password_hash.clone();
    let given = body.current_password;
    if !run_blocking(move || Ok(verify_password(&given, &stored))).await? {
        return Err(ApiError::bad_request("Incorrect password"));
    }

    let password_hash = hash_new_password(body.new_password).await?;
    let db = state.db.clone();
    run_blocking(move || db.set_password_hash(&id, &password_hash)).await?;
    tracing::info!(user_id = %current.id, "Password updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ensure_self(&current, &id)?;
    let db = state.db.clone();
    if !run_blocking(move || db.delete_user(&id)).await? {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = %current.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
