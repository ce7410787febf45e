//! HTTP surface: run submission, run status, preflight, health and metrics
//!
//! ```text
//! POST /runs        create a run and start it in the background (202)
//! GET  /runs/{id}   current run document
//! POST /preflight   clarification questions for an idea
//! GET  /health      liveness and version
//! GET  /metrics     pipeline metrics snapshot
//! ```

pub mod handlers;
pub mod preflight;

use crate::pipeline::PipelineHost;
use crate::request_span;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body. Ideas are capped at 5000 characters.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

fn with_host(
    host: PipelineHost,
) -> impl Filter<Extract = (PipelineHost,), Error = Infallible> + Clone {
    warp::any().map(move || host.clone())
}

fn json_body() -> impl Filter<Extract = (bytes::Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::bytes())
}

/// All routes with CORS, request tracing and JSON rejections
pub fn routes(
    host: PipelineHost,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let create_run = warp::path("runs")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_host(host.clone()))
        .and_then(handlers::create_run);

    let get_run = warp::path!("runs" / String)
        .and(warp::get())
        .and(with_host(host.clone()))
        .and_then(handlers::get_run);

    let preflight = warp::path("preflight")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and_then(handlers::preflight);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_host(host.clone()))
        .and_then(handlers::health);

    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_host(host))
        .and_then(handlers::metrics);

    create_run
        .or(get_run)
        .or(preflight)
        .or(health)
        .or(metrics)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST"])
                .allow_headers(vec!["content-type"]),
        )
        .with(warp::trace(|info| {
            request_span!(method = %info.method(), path = %info.path())
        }))
        .recover(handle_rejection)
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "CORS request forbidden")
    } else {
        tracing::warn!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}

/// Serve the API on `addr` until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    host: PipelineHost,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), warp::Error> {
    let (bound, server) =
        warp::serve(routes(host)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(addr = %bound, "HTTP API listening");
    server.await;
    info!("HTTP API stopped");
    Ok(())
}
