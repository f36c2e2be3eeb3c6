use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

/// Server-Sent Events stream of trigger outcomes, one event per fire
#[tracing::instrument(skip(state))]
pub async fn outcome_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.outcomes.subscribe();
    let shutdown = state.shutdown.clone();
    // The sender outlives the server, so the stream only ends on shutdown
    let stream = BroadcastStream::new(rx)
        .take_until(async move { shutdown.cancelled().await })
        .map(|msg| match msg {
            Ok(outcome) => {
                let json = serde_json::to_string(&outcome).unwrap_or_default();
                Ok(Event::default().event("outcome").data(json))
            }
            // Lagged behind, the client should resync
            Err(_) => Ok(Event::default().event("reconnect")),
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
