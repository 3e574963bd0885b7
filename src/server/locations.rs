use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery, CurrentUser};
use super::{run_blocking, AppState};
use crate::db::{Location, LocationChanges, NewLocation, User};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_locations).post(create_location))
        .route("/me", get(list_locations))
        .route("/user/{user_id}", get(list_user_locations))
        .route(
            "/{id}",
            get(get_location).put(update_location).delete(delete_location),
        )
}

#[derive(Debug, Deserialize)]
struct CreateLocation {
    address: String,
    latitude: f64,
    longitude: f64,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    input_stream_url: Option<String>,
    output_stream_url: Option<String>,
    thumbnail: Option<String>,
}

fn check_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), ApiError> {
    if latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(ApiError::validation("latitude must be between -90 and 90"));
    }
    if longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
        return Err(ApiError::validation("longitude must be between -180 and 180"));
    }
    Ok(())
}

fn ensure_owner(location: &Location, user: &User) -> Result<(), ApiError> {
    if location.owner_user_id.as_deref() == Some(user.id.as_str()) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not enough permissions"))
    }
}

/// Load a location the caller owns: 404 when missing, 403 when foreign.
async fn owned_location(state: &AppState, id: String, user: &User) -> Result<Location, ApiError> {
    let db = state.db.clone();
    let location = run_blocking(move || db.get_location(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Location not found"))?;
    ensure_owner(&location, user)?;
    Ok(location)
}

async fn create_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<CreateLocation>,
) -> Result<impl IntoResponse, ApiError> {
    if body.address.trim().is_empty() {
        return Err(ApiError::validation("address may not be empty"));
    }
    check_coordinates(Some(body.latitude), Some(body.longitude))?;

    let new_location = NewLocation {
        description: body.description,
        tags: body.tags,
        input_stream_url: body.input_stream_url,
        output_stream_url: body.output_stream_url,
        thumbnail: body.thumbnail,
        ..NewLocation::new(body.address, body.latitude, body.longitude).owned_by(user.id)
    };

    let db = state.db.clone();
    let location = run_blocking(move || db.create_location(&new_location)).await?;
    tracing::info!(location_id = %location.id, "Location created");
    Ok((StatusCode::CREATED, Json(location)))
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

async fn list_locations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<Location>>, ApiError> {
    let db = state.db.clone();
    let locations =
        run_blocking(move || db.list_locations_for_owner(&user.id, params.skip, params.limit))
            .await?;
    Ok(Json(locations))
}

/// Locations of one user. Only the user themself may list them.
async fn list_user_locations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<Location>>, ApiError> {
    if user_id != user.id {
        return Err(ApiError::forbidden("Not enough permissions"));
    }
    let db = state.db.clone();
    let locations =
        run_blocking(move || db.list_locations_for_owner(&user_id, params.skip, params.limit))
            .await?;
    Ok(Json(locations))
}

async fn get_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Location>, ApiError> {
    owned_location(&state, id, &user).await.map(Json)
}

async fn update_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<LocationChanges>,
) -> Result<Json<Location>, ApiError> {
    check_coordinates(changes.latitude, changes.longitude)?;
    owned_location(&state, id.clone(), &user).await?;

    let db = state.db.clone();
    run_blocking(move || db.update_location(&id, &changes))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Location not found"))
}

async fn delete_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    owned_location(&state, id.clone(), &user).await?;

    let db = state.db.clone();
    let deleted_id = id.clone();
    if !run_blocking(move || db.delete_location(&deleted_id)).await? {
        return Err(ApiError::not_found("Location not found"));
    }
    tracing::info!(location_id = %id, "Location deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_coordinates() {
        assert!(check_coordinates(Some(52.2), Some(21.0)).is_ok());
        assert!(check_coordinates(None, None).is_ok());
        assert!(check_coordinates(Some(91.0), None).is_err());
        assert!(check_coordinates(None, Some(-181.0)).is_err());
    }
}
