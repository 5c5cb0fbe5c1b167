use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    authors::{
        dto::CreateAuthorRequest,
        repo::{Author, AuthorUpdate, NewAuthor},
    },
    error::{ApiError, ApiResult, StoreError},
    state::AppState,
};

// Author rows answer with a plain 404; the user-specific wording belongs
// to the account flows.
fn author_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => ApiError::NotFound,
        other => other.into(),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/authors", post(create_author).get(list_authors))
        .route(
            "/authors/:id",
            get(get_author).put(update_author).delete(delete_author),
        )
}

#[instrument(skip(state, payload))]
async fn create_author(
    State(state): State<AppState>,
    Json(payload): Json<CreateAuthorRequest>,
) -> ApiResult<Json<Author>> {
    let author = state
        .authors
        .insert(NewAuthor {
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            dob: payload.dob,
        })
        .await?;
    Ok(Json(author))
}

#[instrument(skip(state))]
async fn list_authors(State(state): State<AppState>) -> ApiResult<Json<Vec<Author>>> {
    Ok(Json(state.authors.list().await?))
}

#[instrument(skip(state))]
async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Author>> {
    let author = state
        .authors
        .find_by_id(id)
        .await
        .map_err(author_error)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(author))
}

#[instrument(skip(state, payload))]
async fn update_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AuthorUpdate>,
) -> ApiResult<Json<Author>> {
    let author = state.authors.update(id, payload).await.map_err(author_error)?;
    Ok(Json(author))
}

#[instrument(skip(state))]
async fn delete_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.authors.delete(id).await.map_err(author_error)?;
    Ok(StatusCode::NO_CONTENT)
}
