use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod service;
pub(crate) mod extractors;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
