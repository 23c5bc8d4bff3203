use crate::config::Config;
use crate::conversion::ConversionDispatcher;
use crate::state::TaskRegistry;
use crate::streaming::ChunkIndex;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_sse;
pub mod routes_static;
pub mod routes_stream;
pub mod routes_tasks;
pub mod routes_upload;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
    pub dispatcher: Arc<ConversionDispatcher>,
    pub chunk_index: Arc<ChunkIndex>,
}

impl AppContext {
    /// Wire the registry, dispatcher and chunk index from configuration.
    pub fn new(config: Config) -> Self {
        let registry = TaskRegistry::new();
        let dispatcher = ConversionDispatcher::from_config(&config, Arc::clone(&registry));
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(config: Config, dispatcher: Arc<ConversionDispatcher>) -> Self {
        let registry = Arc::clone(dispatcher.registry());
        let chunk_index = Arc::new(ChunkIndex::new(Arc::clone(&registry)));
        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            chunk_index,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let static_routes = routes_static::static_routes(&ctx.config.server);

    Router::new()
        .route("/", get(index_page))
        .nest("/api/v1", api_routes(&ctx))
        .with_state(ctx)
        .merge(static_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_check))
        .merge(routes_upload::upload_routes(&ctx.config.server))
        .merge(routes_tasks::task_routes())
        .merge(routes_stream::stream_routes())
        .merge(routes_sse::sse_routes())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>castforge</title></head>
<body>
<h1>Upload a video</h1>
<form action="/api/v1/upload/" method="post" enctype="multipart/form-data">
  <p><input type="file" name="file" required></p>
  <p>
    <select name="media_format">
      <option value="hls">HLS</option>
      <option value="dash">DASH</option>
      <option value="raw">Raw</option>
    </select>
    <select name="streaming_protocol">
      <option value="hls">HLS</option>
      <option value="dash">DASH</option>
      <option value="rtsp">RTSP</option>
    </select>
  </p>
  <p><label>Segment duration <input type="number" name="segment_duration" value="6" min="1"></label></p>
  <p><label>Stream id (RTSP) <input type="text" name="stream_id"></label></p>
  <p><label><input type="checkbox" name="adaptive" value="true"> Adaptive HLS ladder</label></p>
  <p><button type="submit">Convert</button></p>
</form>
</body>
</html>
"#;

/// Start the HTTP server and run until Ctrl-C or SIGTERM.
///
/// After the listener stops, in-flight transcodes are cancelled and every
/// live stream is stopped.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    tokio::fs::create_dir_all(&config.server.upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.server.upload_dir.display()))?;
    tokio::fs::create_dir_all(&config.server.media_root)
        .await
        .with_context(|| format!("Failed to create {}", config.server.media_root.display()))?;

    let ctx = AppContext::new(config);
    let dispatcher = Arc::clone(&ctx.dispatcher);
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
