//! The `/api/progress` stream.
//!
//! Each client gets its own bounded broker subscription; slow readers
//! drop events instead of back-pressuring the download pipeline. The
//! subscription unregisters itself when the client disconnects and the
//! stream is dropped.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};

use crate::api::AppState;

pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.engine.subscribe_progress();
    let stream = stream::unfold(subscription, |mut subscription| async move {
        let msg = subscription.recv().await?;
        let event = match serde_json::to_string(&msg) {
            Ok(data) => Event::default().data(data),
            Err(_) => Event::default().comment("unserializable progress event"),
        };
        Some((Ok::<_, Infallible>(event), subscription))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
