//! HTTP surface of the navplay web player.

pub mod api;
pub mod web;

use std::path::Path;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use navplay_core::SubsonicClient;
use tower_http::cors::CorsLayer;

use api::AppState;

/// Full application: JSON API under `/api`, `/ping`, static page everywhere else.
pub fn app(client: Arc<SubsonicClient>, web_dir: &Path) -> Router {
    let state = AppState { client };

    Router::new()
        .route("/ping", get(api::ping))
        .with_state(state.clone())
        .nest("/api", api::router(state))
        .fallback_service(web::static_files(web_dir))
        .layer(CorsLayer::permissive())
}
