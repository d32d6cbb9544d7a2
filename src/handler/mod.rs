use crate::app::AppState;
use axum::{routing::get, Router};

pub mod middleware;
pub mod webhook;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ivr", get(webhook::ivr_handler).post(webhook::ivr_handler))
        .route(
            "/ivr/{*path}",
            get(webhook::ivr_handler).post(webhook::ivr_handler),
        )
        .route("/ping", get(webhook::ping).post(webhook::ping))
}
