// Graph event streaming (SSE)
//
// Bridges the graph hub onto an SSE response: the first event is the
// full snapshot, then incremental updates. Every delivered message
// refreshes the subscriber's read deadline; when the client disconnects
// the receiver closes and the hub drops the subscriber.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use groundwork_core::ErrorKind;
use groundwork_engine::{GraphHub, GraphMessage};
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<GraphHub>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/apps/:name/graph/stream", get(stream_graph))
        .with_state(state)
}

fn to_sse(message: &GraphMessage) -> SseEvent {
    match message {
        GraphMessage::Snapshot(payload) => SseEvent::default()
            .event("snapshot")
            .data(payload.to_string()),
        GraphMessage::Update(payload) => SseEvent::default()
            .event("update")
            .data(payload.to_string()),
        GraphMessage::Ping => SseEvent::default().event("ping").data("{}"),
    }
}

async fn stream_graph(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let subscription = state
        .hub
        .register(&name)
        .await
        .map_err(|e| ApiError::new(ErrorKind::Unavailable, e.to_string()))?;
    info!(app = %name, subscriber = %subscription.id, "graph stream opened");

    let hub = state.hub.clone();
    let stream = futures::stream::unfold(
        (subscription, hub, name),
        |(mut subscription, hub, name)| async move {
            let message = subscription.rx.recv().await?;
            // a delivered message counts as liveness
            hub.pong(&name, subscription.id).await;
            let event = to_sse(&message);
            Some((Ok::<_, Infallible>(event), (subscription, hub, name)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
