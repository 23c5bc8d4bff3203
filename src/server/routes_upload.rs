use crate::config::ServerConfig;
use crate::server::{AppContext, AppError};
use crate::state::ConversionSpec;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use castforge_common::{
    Error, MediaFormat, Renditions, Result, StreamId, StreamingProtocol, TaskId, TaskStatus,
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::BufWriter;
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::streaming::output_path;

pub fn upload_routes(config: &ServerConfig) -> Router<AppContext> {
    Router::new()
        .route("/upload/", post(upload))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
    pub output_path: PathBuf,
    /// Where the output will be playable once the task completes.
    pub stream_url: String,
    pub status_url: String,
}

/// Form fields, with the file already saved to the upload directory.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<PathBuf>,
    media_format: Option<String>,
    streaming_protocol: Option<String>,
    segment_duration: Option<String>,
    stream_id: Option<String>,
    adaptive: Option<String>,
}

async fn upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> std::result::Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut form = UploadForm::default();
    if let Err(e) = read_form(&ctx, &mut multipart, &mut form).await {
        if let Some(path) = form.file.take() {
            discard(&path).await;
        }
        return Err(e);
    }

    let input = form
        .file
        .clone()
        .ok_or_else(|| Error::invalid_spec("missing file field"))?;
    let spec = match build_spec(&ctx, &input, &form) {
        Ok(spec) => spec,
        Err(e) => {
            discard(&input).await;
            return Err(e.into());
        }
    };
    let media_format = spec.media_format;
    let output = spec.output.clone();

    let task_id = match ctx.registry.create(spec) {
        Ok(id) => id,
        Err(e) => {
            discard(&input).await;
            return Err(e.into());
        }
    };
    tracing::info!(
        task_id = %task_id,
        input = %input.display(),
        output = %output.display(),
        "Upload accepted"
    );
    let task = ctx.registry.get(task_id)?;
    let stream_url = match task.streaming_protocol {
        StreamingProtocol::Rtsp => ctx.dispatcher.rtsp_url(
            &task
                .stream_id
                .clone()
                .unwrap_or_else(|| StreamId::from(task_id)),
        ),
        _ => ctx.dispatcher.playback_url(&task),
    };
    ctx.dispatcher.spawn(task_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            task_id,
            status: TaskStatus::Pending,
            message: format!("Conversion to {media_format} started"),
            output_path: output,
            stream_url,
            status_url: format!("/api/v1/tasks/{task_id}"),
        }),
    ))
}

/// Read every field into `form`. Only the last `file` field is kept.
async fn read_form(
    ctx: &AppContext,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> std::result::Result<(), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if let Some(previous) = form.file.take() {
                    discard(&previous).await;
                }
                let original = field.file_name().unwrap_or_default().to_string();
                let path = ctx
                    .config
                    .server
                    .upload_dir
                    .join(unique_file_name(&original));
                save_field(&path, field).await?;
                form.file = Some(path);
            }
            "media_format" => form.media_format = Some(field.text().await.map_err(malformed)?),
            "streaming_protocol" => {
                form.streaming_protocol = Some(field.text().await.map_err(malformed)?)
            }
            "segment_duration" => {
                form.segment_duration = Some(field.text().await.map_err(malformed)?)
            }
            "stream_id" => form.stream_id = Some(field.text().await.map_err(malformed)?),
            "adaptive" => form.adaptive = Some(field.text().await.map_err(malformed)?),
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }
    Ok(())
}

fn build_spec(ctx: &AppContext, input: &Path, form: &UploadForm) -> Result<ConversionSpec> {
    let media_format: MediaFormat = required(&form.media_format, "media_format")?.parse()?;
    let streaming_protocol: StreamingProtocol =
        required(&form.streaming_protocol, "streaming_protocol")?.parse()?;

    let segment_duration = match non_empty(&form.segment_duration) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| Error::invalid_spec(format!("invalid segment_duration: {raw:?}")))?,
        None => ctx.config.conversion.default_segment_duration,
    };
    let stream_id = non_empty(&form.stream_id).map(StreamId::new).transpose()?;
    let renditions = match non_empty(&form.adaptive) {
        Some(v) if matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes") => {
            Renditions::Ladder
        }
        _ => Renditions::Single,
    };

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let output = output_path(&ctx.config.server.media_root, &stem, media_format);

    let mut spec = ConversionSpec::new(input, output, media_format, streaming_protocol);
    spec.segment_duration = segment_duration;
    spec.renditions = renditions;
    spec.stream_id = stream_id;
    spec.validate()?;
    Ok(spec)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    non_empty(value).ok_or_else(|| Error::invalid_spec(format!("missing {field} field")))
}

fn malformed(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError(Error::invalid_spec(format!("malformed upload: {}", e.body_text())))
}

/// `<stem>_<8 hex>.<ext>` with every character outside `[A-Za-z0-9_-]`
/// replaced, so a client name can never leave the upload directory.
fn unique_file_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = Path::new(&base);

    let stem = base
        .file_stem()
        .map(|s| sanitize(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let ext = base
        .extension()
        .map(|e| sanitize(&e.to_string_lossy()))
        .filter(|e| !e.is_empty());

    let suffix = Uuid::new_v4().simple().to_string();
    match ext {
        Some(ext) => format!("{stem}_{}.{ext}", &suffix[..8]),
        None => format!("{stem}_{}", &suffix[..8]),
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn save_field(path: &Path, field: Field<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = field.map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader = StreamReader::new(body);
    futures::pin_mut!(reader);

    let mut file = BufWriter::new(tokio::fs::File::create(path).await?);
    let copied = tokio::io::copy(&mut reader, &mut file).await;
    let flushed = match copied {
        Ok(_) => tokio::io::AsyncWriteExt::flush(&mut file).await,
        Err(e) => Err(e),
    };
    if let Err(e) = flushed {
        discard(path).await;
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), "Saved upload");
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove rejected upload");
    }
}
