use crate::state::AppState;
use axum::{routing::post, Router};

pub mod events;
pub mod handler;
pub mod model;

pub fn router() -> Router<AppState> {
    Router::new().route("/invoke", post(handler::invoke))
}
