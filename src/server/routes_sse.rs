use crate::server::AppContext;
use crate::state::TaskEvent;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

pub async fn events_handler(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.registry.subscribe();

    // Lagged receivers skip the missed events rather than closing.
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event: TaskEvent| {
            let data = serde_json::to_string(&event)
                .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
            Ok(Event::default().data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}
