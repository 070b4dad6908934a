//! Server-Sent Events stream carrying host → view messages.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use panel::bus::Outbound;
use panel::client::MESSAGE_EVENT;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// SSE endpoint handler.
///
/// Only one view may be attached: the host's outbound queue has a single
/// consumer. A second attach gets `409 Conflict` until the first disconnects.
/// Frames queued while no view was attached answered a view that is gone, so
/// they are dropped on attach.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let Ok(mut outbound) = state.outbound.clone().try_lock_owned() else {
        warn!("rejecting second view, one is already attached");
        return Err(StatusCode::CONFLICT);
    };
    let stale = discard_stale(&mut outbound);
    info!(stale, "view attached");
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                frame = outbound.recv() => frame,
            };
            match frame {
                Some(frame) => yield Ok(Event::default().event(MESSAGE_EVENT).data(frame)),
                None => break,
            }
        }
        info!("view detached");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Drop every frame already waiting in the queue; returns how many.
fn discard_stale(outbound: &mut Outbound) -> usize {
    let mut dropped = 0;
    while let Some(frame) = outbound.try_recv() {
        debug!(frame = %frame, "dropping frame queued before attach");
        dropped += 1;
    }
    dropped
}
