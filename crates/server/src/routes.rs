//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Fragment uploads come in arbitrary-sized pieces; allow large ones.
const MAX_FRAGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (intentionally unauthenticated for probes)
        .route("/v1/health", get(handlers::health_check))
        // Blob read path (get also serves HEAD)
        .route("/item/{id}/@blob/{n}", get(handlers::get_blob))
        // Upload staging
        .route(
            "/upload/{id}",
            post(handlers::append_fragment)
                .get(handlers::get_upload)
                .delete(handlers::delete_upload),
        )
        .route("/upload/{id}/content", get(handlers::get_upload_content))
        .route("/upload/{id}/last", delete(handlers::rollback_upload))
        .route("/upload/{id}/labels", put(handlers::set_upload_labels))
        .route(
            "/upload/{id}/metadata",
            put(handlers::update_upload_metadata),
        )
        .route("/upload/{id}/verify", post(handlers::verify_upload))
        .route("/uploads", get(handlers::list_uploads))
        .layer(DefaultBodyLimit::max(MAX_FRAGMENT_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
