use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

// Notification batches are small JSON documents.
const MAX_EVENT_BYTES: usize = 1024 * 1024;

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_EVENT_BYTES))
        .with_state(state)
}
