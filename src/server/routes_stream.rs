//! Playback discovery, chunk delivery and live stream control.

use crate::server::{AppContext, AppError};
use crate::streaming::{get_playback_info, ChunkKind, PlaybackInfo};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use castforge_av::StreamInfo;
use castforge_common::paths::content_type_for;
use castforge_common::{Error, StreamId, TaskId};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/stream/:id", get(playback_info))
        .route("/chunks/:id", get(serve_chunk))
        .route("/streams", get(list_streams))
        .route("/streams/:stream_id", delete(stop_stream))
}

async fn playback_info(
    State(ctx): State<AppContext>,
    Path(id): Path<u64>,
) -> Result<Json<PlaybackInfo>, AppError> {
    let info = get_playback_info(&ctx.chunk_index, TaskId::from(id)).await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    chunk_name: String,
    chunk_type: String,
}

async fn serve_chunk(
    State(ctx): State<AppContext>,
    Path(id): Path<u64>,
    Query(query): Query<ChunkQuery>,
) -> Result<Response, AppError> {
    let kind: ChunkKind = query.chunk_type.parse()?;
    let path = ctx
        .chunk_index
        .chunk_path(TaskId::from(id), kind, &query.chunk_name)
        .await?;

    let file = tokio::fs::File::open(&path).await.map_err(Error::from)?;
    let len = file.metadata().await.map_err(Error::from)?.len();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&path).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn list_streams(State(ctx): State<AppContext>) -> Json<Vec<StreamInfo>> {
    Json(ctx.dispatcher.supervisor().list().await)
}

async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(stream_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let stream_id = StreamId::new(stream_id)?;
    let supervisor = ctx.dispatcher.supervisor();
    if !supervisor.is_running(&stream_id).await {
        return Err(Error::not_found("stream", &stream_id).into());
    }
    supervisor.stop(&stream_id).await;
    tracing::info!(stream_id = %stream_id, "Live stream stopped by request");
    Ok(StatusCode::NO_CONTENT)
}
