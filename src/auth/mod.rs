use crate::db::AppState;
use axum::Router;

pub mod dto;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
mod repo_types;

pub use repo_types::{User, DEFAULT_AVATAR};

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
