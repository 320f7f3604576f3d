#![forbid(unsafe_code)]

use std::{
    collections::BTreeMap,
    env,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use pagebeat_adapter::{
    wall_clock_now, AdapterHealthResponse, AdapterRuntime, AnnotateAdapterRequest,
    AnnotateAdapterResponse, TrackAdapterResponse,
};
use pagebeat_contracts::hit::HitPayload;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let bind = env::var("PAGEBEAT_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;

    let runtime = Arc::new(Mutex::new(AdapterRuntime::new()));
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/track", post(track))
        .route("/track/", post(track))
        .route("/v1/metrics/annotate", post(annotate))
        .with_state(runtime);

    log::info!("pagebeat_http listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    let runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AdapterHealthResponse {
                    status: "error".to_string(),
                    stat_rows: 0,
                    sessions: 0,
                }),
            );
        }
    };
    (StatusCode::OK, Json(runtime.health()))
}

/// The `token` query parameter is cache-busting only; it is accepted and
/// discarded along with anything else in the query string.
async fn track(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
    Query(_query): Query<BTreeMap<String, String>>,
    Json(hit): Json<HitPayload>,
) -> (StatusCode, Json<TrackAdapterResponse>) {
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TrackAdapterResponse {
                    status: "error".to_string(),
                    outcome: "REJECTED".to_string(),
                    reason: Some("adapter runtime lock poisoned".to_string()),
                }),
            )
        }
    };
    let response = runtime.track(hit, wall_clock_now());
    let status = if response.outcome == "ACCEPTED" {
        StatusCode::ACCEPTED
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

async fn annotate(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
    Json(request): Json<AnnotateAdapterRequest>,
) -> (StatusCode, Json<AnnotateAdapterResponse>) {
    let runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AnnotateAdapterResponse {
                    status: "error".to_string(),
                    rows: Vec::new(),
                }),
            )
        }
    };
    (StatusCode::OK, Json(runtime.annotate(request)))
}
