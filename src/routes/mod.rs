use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub mod admin;
pub mod auth;
pub mod health;
pub mod schedules;
pub mod users;

/// Everything served under `/api`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/users", users::router())
        .nest("/admin", admin::router())
}
