//! Login, current user and password recovery endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::extract::{ApiForm, ApiJson, CurrentUser};
use super::{run_blocking, AppState};
use crate::auth::{
    generate_reset_token, hash_password, hash_reset_token, validate_password_policy,
    verify_password,
};
use crate::db::User;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_json))
        .route("/login/form", post(login_form))
        .route("/me", get(me))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/change-password", post(change_password))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// OAuth2 password-grant form. `username` carries the email.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Hash a password on the blocking pool after checking the policy.
pub(super) async fn hash_new_password(password: String) -> Result<String, ApiError> {
    validate_password_policy(&password).map_err(ApiError::validation)?;
    run_blocking(move || Ok(hash_password(&password)?)).await
}

async fn authenticate(state: &AppState, email: String, password: String) -> Result<User, ApiError> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        let user = db.get_user_by_email(&email)?;
        Ok(user.filter(|u| verify_password(&password, &u.password_hash)))
    })
    .await?
    .ok_or_else(|| ApiError::unauthorized("Incorrect email or password"))?;

    if !user.is_active {
        return Err(ApiError::bad_request("Inactive user"));
    }
    Ok(user)
}

fn issue_token(state: &AppState, user: &User) -> Result<Json<TokenResponse>, ApiError> {
    let access_token = state.tokens.issue(&user.id).map_err(ApiError::internal)?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.tokens.ttl().num_seconds(),
    }))
}

async fn login_json(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = authenticate(&state, body.email, body.password).await?;
    issue_token(&state, &user)
}

async fn login_form(
    State(state): State<AppState>,
    ApiForm(form): ApiForm<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = authenticate(&state, form.username, form.password).await?;
    issue_token(&state, &user)
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

/// Always answers 202 so callers cannot probe for registered addresses.
async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let expires_at = Utc::now() + Duration::hours(state.config.auth.reset_token_expire_hours);
    let frontend_url = state.config.auth.frontend_url.trim_end_matches('/').to_string();

    run_blocking(move || {
        let Some(user) = db.get_user_by_email(&body.email)? else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(());
        };
        if !user.is_active {
            return Ok(());
        }
        let token = generate_reset_token();
        db.create_password_reset(&user.id, &hash_reset_token(&token), expires_at)?;
        tracing::info!(user_id = %user.id, "Password reset token issued");
        tracing::debug!(
            link = %format!("{}/reset-password?token={}", frontend_url, token),
            "Password reset link"
        );
        Ok(())
    })
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the email is registered, a password reset link has been sent",
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct ResetPasswordRequest {
    token: String,
    new_password: String,
}

async fn reset_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password_hash = hash_new_password(body.new_password).await?;
    let token_hash = hash_reset_token(&body.token);

    let db = state.db.clone();
    let consumed = run_blocking(move || {
        let now = Utc::now();
        let Some(reset) = db.find_valid_password_reset(&token_hash, now)? else {
            return Ok(false);
        };
        if !db.consume_password_reset(&reset.id, &reset.user_id, &password_hash, now)? {
            return Ok(false);
        }
        tracing::info!(user_id = %reset.user_id, "Password reset completed");
        Ok(true)
    })
    .await?;

    if !consumed {
        return Err(ApiError::unauthorized("Invalid or expired reset token"));
    }
    Ok(Json(MessageResponse {
        message: "Password has been reset",
    }))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = user.password_hash.clone();
    let current = body.current_password;
    let matches = run_blocking(move || Ok(verify_password(&current, &stored))).await?;
    if !matches {
        return Err(ApiError::bad_request("Incorrect password"));
    }

    let password_hash = hash_new_password(body.new_password).await?;
    let db = state.db.clone();
    let user_id = user.id.clone();
    run_blocking(move || db.set_password_hash(&user_id, &password_hash)).await?;
    tracing::info!(user_id = %user.id, "Password changed");

    Ok(Json(MessageResponse {
        message: "Password updated successfully",
    }))
}
