use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use cdc_core::Error;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{handlers::AppState, ApiResponse};

/// Server-sent change events of one profile. Each request is its own relay
/// session; dropping the response cancels it.
pub async fn stream_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let profile = match state.lifecycle.get(&id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return ApiResponse::<()>::not_found("Profile").into_response(),
        Err(e) => return ApiResponse::<()>::from_error(e).into_response(),
    };

    let sequence = match state
        .relay
        .open(profile.topic_prefix(), CancellationToken::new())
        .await
    {
        Ok(sequence) => sequence,
        Err(e) => return ApiResponse::<()>::from_error(e).into_response(),
    };
    info!("[{}] Streaming events in session {}", id, sequence.session_id());

    let events = sequence.into_stream().map(|item| match item {
        Ok(relayed) => Event::default()
            .id(&relayed.resume_id)
            .event(relayed.event.kind())
            .json_data(&relayed),
        Err(e) => Ok(error_event(&e)),
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn error_event(error: &Error) -> Event {
    Event::default()
        .event("error")
        .data(format!("{}; open a new session to continue", error))
}
