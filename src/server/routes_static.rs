//! Static file serving for produced playlists and segments.

use crate::config::ServerConfig;
use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    Router,
};
use castforge_common::paths::content_type_for;
use std::path::Path;
use tower_http::services::ServeDir;

const OCTET_STREAM: &str = "application/octet-stream";

pub fn static_routes(config: &ServerConfig) -> Router {
    let prefix = config.static_url_prefix.trim_end_matches('/');
    let prefix = if prefix.is_empty() { "/static" } else { prefix };
    tracing::debug!(prefix, dir = %config.static_dir.display(), "Serving static files");

    Router::new()
        .nest_service(prefix, ServeDir::new(&config.static_dir))
        .layer(middleware::from_fn(delivery_content_type))
}

/// Replace the guessed content type of playlists and segments with the one
/// players expect.
async fn delivery_content_type(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    if response.status().is_success() {
        let content_type = content_type_for(Path::new(&path));
        if content_type != OCTET_STREAM {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
    response
}
