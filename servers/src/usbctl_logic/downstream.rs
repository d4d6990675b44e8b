//! HTTP surface: device list, bind/unbind, live event stream and health.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::{self, Stream, StreamExt};
use lib_usbctl::{ErrorKind, Snapshot, Subscription, Verb};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use crate::usbctl_logic::state::AppState;

#[derive(Debug, Deserialize)]
struct MutationRequest {
    busid: String,
}

#[derive(Serialize)]
struct MutationResponse<'a> {
    status: &'static str,
    devices: &'a Snapshot,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/devices", get(devices_handler))
        .route("/bind", post(bind_handler))
        .route("/unbind", post(unbind_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves until the shutdown token fires, then drains open connections.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("HTTP server shutting down");
        })
        .await
}

async fn devices_handler(State(state): State<AppState>) -> Json<Snapshot> {
    Json(Snapshot::clone(&state.registry.snapshot()))
}

async fn bind_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationRequest>, JsonRejection>,
) -> Response {
    mutate(state, Verb::Bind, body).await
}

async fn unbind_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationRequest>, JsonRejection>,
) -> Response {
    mutate(state, Verb::Unbind, body).await
}

async fn mutate(state: AppState, verb: Verb, body: Result<Json<MutationRequest>, JsonRejection>) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(%verb, reason = %rejection.body_text(), "malformed request body");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request: {}", rejection.body_text()));
        }
    };

    // Own task so a dropped connection cannot abandon the operation halfway.
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move {
        match verb {
            Verb::Bind => orchestrator.bind(&request.busid).await,
            Verb::Unbind => orchestrator.unbind(&request.busid).await,
        }
    });

    match task.await {
        Ok(Ok(snapshot)) => Json(MutationResponse {
            status: "success",
            devices: &snapshot,
        })
        .into_response(),
        Ok(Err(err)) => error_response(status_for(err.kind()), err.to_string()),
        Err(join_error) => {
            error!(%verb, error = %join_error, "device operation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, String::from("internal error"))
        }
    }
}

/// Live device list as Server-Sent Events. Dropping the stream unsubscribes.
async fn events_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.dispatcher.subscribe();
    let initial = state.registry.snapshot();
    let events = snapshot_payloads(subscription, initial, state.shutdown.clone())
        .map(|payload| Ok::<_, Infallible>(Event::default().data(&*payload)));

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.heartbeat).text("heartbeat"))
}

/// The `initial` list first, then one payload per published change. Ends
/// when shutdown begins or the hub closes the queue.
fn snapshot_payloads(
    subscription: Subscription,
    initial: Arc<Snapshot>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Arc<str>> {
    let first: Arc<str> = Arc::from(initial.to_json());
    let updates = stream::unfold(
        (subscription, shutdown, initial),
        |(mut subscription, shutdown, initial)| async move {
            loop {
                let frame = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    frame = subscription.recv() => frame,
                }?;
                // Published between subscribe and the initial read: already sent.
                if Arc::ptr_eq(&frame.snapshot, &initial) {
                    continue;
                }
                let payload = Arc::clone(&frame.payload);
                return Some((payload, (subscription, shutdown, initial)));
            }
        },
    );

    stream::once(async move { first }).chain(updates)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "devices": state.registry.snapshot().len(),
        "subscribers": state.dispatcher.len(),
    }))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Busy => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ExternalTool => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { status: "error", error })).into_response()
}
