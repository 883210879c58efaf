// SPDX-License-Identifier: Apache-2.0

use crate::http::bad_request;
use crate::store::Store;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::header::{HeaderValue, CACHE_CONTROL, CONNECTION};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Maximum client update rate is one event per throttle tick (~3/s); bursts
/// of notifications coalesce into a single pending flush.
const STREAM_THROTTLE: Duration = Duration::from_millis(333);

/// Server-push stream of `{views, clicks}` aggregates for one email: an
/// immediate snapshot, then one coalesced update per throttle window while
/// events keep arriving. Disconnect tears the subscription down.
pub async fn email_stats_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if id.trim().is_empty() {
        return bad_request("missing email id");
    }

    let (handle, mut wake) = state.notifier.subscribe(&id);
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let store = Arc::clone(&state.store);
    let notifier = Arc::clone(&state.notifier);
    let email_id = id;

    tokio::spawn(async move {
        let mut throttle = tokio::time::interval(STREAM_THROTTLE);
        throttle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Some(event) = stats_event(store.as_ref(), &email_id).await {
            if tx.send(Ok(event)).await.is_err() {
                notifier.unsubscribe(&email_id, handle);
                return;
            }
        }

        let mut pending = false;
        loop {
            tokio::select! {
                wakeup = wake.recv() => match wakeup {
                    Some(()) => pending = true,
                    None => break,
                },
                _ = throttle.tick() => {
                    if pending {
                        pending = false;
                        if let Some(event) = stats_event(store.as_ref(), &email_id).await {
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                () = tx.closed() => break,
            }
        }
        notifier.unsubscribe(&email_id, handle);
    });

    let mut resp = Sse::new(ReceiverStream::new(rx)).into_response();
    let headers = resp.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}

/// One aggregate read per source; a failed read skips this update and the
/// stream carries on.
async fn stats_event(store: &dyn Store, email_id: &str) -> Option<Event> {
    let views = match store.email_view_count(email_id).await {
        Ok(views) => views,
        Err(err) => {
            warn!(email_id, "stream view count failed: {err}");
            return None;
        }
    };
    let clicks = match store.email_click_count(email_id).await {
        Ok(clicks) => clicks,
        Err(err) => {
            warn!(email_id, "stream click count failed: {err}");
            return None;
        }
    };
    let payload = serde_json::json!({ "views": views, "clicks": clicks });
    Some(Event::default().data(payload.to_string()))
}
