pub mod admin;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod progress;
pub mod routes;
pub mod shutdown;
pub mod store;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use http::HeaderValue;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::store::SharedStore;

/// The full HTTP application with its middleware stack.
pub fn app(store: SharedStore, config: &Config) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(store))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors(&config.cors_origins))
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
