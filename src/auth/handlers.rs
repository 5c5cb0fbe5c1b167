use axum::{
    extract::{Path, State},
    response::Redirect,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            CallbackQuery, ChangePasswordRequest, ForgetPasswordRequest, LoginRequest,
            LoginResponse, MessageResponse, ResetPasswordRequest, UserInfo,
        },
        extractors::AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/auth/google", get(google_redirect))
        .route("/auth/google/callback", get(google_callback))
        .route("/password/forget", post(forget_password))
        .route("/password/reset/:token", patch(reset_password))
        .route("/users/:id/password", patch(change_password))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let (token, user) = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(LoginResponse {
        token,
        user_info: UserInfo::from(&user),
    }))
}

#[instrument(skip(state))]
async fn google_redirect(State(state): State<AppState>) -> ApiResult<Redirect> {
    let url = state.auth.authorize_redirect()?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state, query))]
async fn google_callback(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<CallbackQuery>,
) -> ApiResult<Json<LoginResponse>> {
    // state is round-tripped but not verified; the service keeps no
    // per-request state to compare it against
    tracing::debug!(state = ?query.state, "oauth callback");
    let (token, user) = state.auth.google_callback(&query.code).await?;
    Ok(Json(LoginResponse {
        token,
        user_info: UserInfo::from(&user),
    }))
}

/// Same body whether or not the account exists.
#[instrument(skip(state, payload))]
async fn forget_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.auth.request_password_reset(&payload.email).await?;
    Ok(Json(MessageResponse {
        message: "password reset link has been sent to you".into(),
    }))
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.auth.reset_password(&token, &payload.password).await?;
    Ok(Json(MessageResponse {
        message: "password has been reset".into(),
    }))
}

#[instrument(skip(state, payload))]
async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    // Only the account owner may change their password.
    if claims.sub != id {
        return Err(ApiError::Forbidden);
    }
    state
        .auth
        .change_password(id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "password has been changed".into(),
    }))
}
