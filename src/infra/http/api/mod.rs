pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/images", post(handlers::create_image))
        .route(
            "/api/v1/images/{tex_key}",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route("/healthz", get(handlers::healthz))
        .route("/media/{*path}", get(handlers::serve_media))
        .with_state(state)
}
