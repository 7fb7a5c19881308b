//! # Event Stream
//!
//! Server-sent events for every engine change, plus the autosave loop that
//! writes touched namespaces back to the snapshot store.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use agentflow_core::state::Namespace;
use futures::stream::{self, Stream};
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use super::SharedState;

const HEARTBEAT: Duration = Duration::from_secs(15);

/// SSE endpoint for engine events. Idle connections get a heartbeat
/// comment every `HEARTBEAT`.
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default()
                        .id(event.id.clone())
                        .event(event.kind.namespace().as_str())
                        .data(json);
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE client lagged behind events");
                    continue;
                }
                // Bus closed
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}

/// Persist every namespace an event touches. Bursts are coalesced so a
/// busy run writes each namespace once per burst.
pub fn spawn_autosave(state: SharedState) -> JoinHandle<()> {
    let mut rx = state.engine.subscribe();
    tokio::spawn(async move {
        loop {
            let mut touched = HashSet::new();
            match rx.recv().await {
                Ok(event) => {
                    touched.insert(event.kind.namespace());
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Autosave lagged; saving everything");
                    touched.extend(Namespace::ALL);
                }
                Err(RecvError::Closed) => break,
            }

            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        touched.insert(event.kind.namespace());
                    }
                    Err(TryRecvError::Lagged(_)) => {
                        touched.extend(Namespace::ALL);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }

            for namespace in touched {
                if let Err(e) = state.engine.persist(namespace).await {
                    tracing::warn!(namespace = namespace.as_str(), error = %e, "Autosave failed");
                }
            }
        }
        tracing::debug!("Autosave stopped");
    })
}
