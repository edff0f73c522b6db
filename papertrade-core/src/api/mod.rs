//! Dashboard API
//!
//! HTTP server for live dashboards:
//!
//! - `GET /health`           liveness and subscriber count
//! - `GET /api/v1/snapshot`  current account, positions and risk state
//! - `GET /ws`               WebSocket event stream, one JSON event per text frame
//!
//! The WebSocket channel is broadcast-only. Client frames are read only to keep
//! the idle timer alive and to notice disconnects.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::config::BroadcastConfig;
use crate::events::EventBus;

/// API error types
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
}

impl warp::reject::Reject for ApiError {}

/// Dashboard server
pub struct DashboardServer {
    bus: Arc<EventBus>,
    config: BroadcastConfig,
}

impl DashboardServer {
    pub fn new(bus: Arc<EventBus>, config: BroadcastConfig) -> Self {
        Self { bus, config }
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
        // Health check endpoint
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_bus(self.bus.clone()))
            .map(|bus: Arc<EventBus>| {
                warp::reply::json(&json!({
                    "status": "ok",
                    "service": "papertrade-dashboard",
                    "subscribers": bus.subscriber_count(),
                    "timestamp": chrono::Utc::now()
                }))
            });

        // Snapshot endpoint
        let snapshot = warp::path!("api" / "v1" / "snapshot")
            .and(warp::get())
            .and(with_bus(self.bus.clone()))
            .and_then(get_snapshot);

        // Event stream
        let config = self.config.clone();
        let ws = warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .and(with_bus(self.bus.clone()))
            .map(move |ws: warp::ws::Ws, bus: Arc<EventBus>| {
                let config = config.clone();
                ws.on_upgrade(move |socket| handle_socket(socket, bus, config))
            });

        let cors = warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET", "OPTIONS"]);

        health
            .or(snapshot)
            .or(ws)
            .with(cors)
            .recover(handle_rejection)
    }

    /// Bind the configured address. Returns the bound address (useful with
    /// port 0) and the server future, which completes after `shutdown` fires.
    pub fn bind_with_shutdown<S>(
        &self,
        shutdown: S,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), warp::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let (addr, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(self.config.bind_address, shutdown)?;
        info!("Starting dashboard server on {}", addr);
        Ok((addr, server))
    }
}

// Helper function to inject the event bus
fn with_bus(bus: Arc<EventBus>) -> impl Filter<Extract = (Arc<EventBus>,), Error = Infallible> + Clone {
    warp::any().map(move || bus.clone())
}

/// Get the latest session snapshot
async fn get_snapshot(bus: Arc<EventBus>) -> Result<impl Reply, Rejection> {
    match bus.snapshot() {
        Some(snapshot) => Ok(warp::reply::json(&snapshot)),
        None => Err(warp::reject::custom(ApiError {
            message: "No active session".to_string(),
        })),
    }
}

/// Serve one dashboard connection until either side goes away.
async fn handle_socket(socket: WebSocket, bus: Arc<EventBus>, config: BroadcastConfig) {
    let subscriber = bus.subscribe();
    let connection_id = subscriber.connection_id();
    let (mut sink, mut stream) = socket.split();

    let ping_interval = config.ping_interval();
    let idle_timeout = config.idle_timeout();

    // Forward queued events to the client, FIFO
    let send_loop = async {
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        loop {
            tokio::select! {
                event = subscriber.recv() => {
                    let Some(event) = event else { break };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize {} event: {}", event.kind(), e);
                            continue;
                        }
                    };
                    if sink.send(Message::text(text)).await.is_err() {
                        break; // Client disconnected
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    };

    // Watch inbound traffic for close frames and idleness
    let recv_loop = async {
        loop {
            match tokio::time::timeout(idle_timeout, stream.next()).await {
                Ok(Some(Ok(message))) if message.is_close() => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    debug!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    info!("Dashboard subscriber {} idle for {:?}, dropping", connection_id, idle_timeout);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = send_loop => {},
        _ = recv_loop => {},
    }

    bus.unsubscribe(connection_id);
    debug!("Dashboard subscriber {} disconnected", connection_id);
}

/// Handle API errors
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;

    if err.is_not_found() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Endpoint not found";
    } else if let Some(api_error) = err.find::<ApiError>() {
        code = warp::http::StatusCode::SERVICE_UNAVAILABLE;
        message = &api_error.message;
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = warp::http::StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed";
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error";
    }

    let json = warp::reply::json(&json!({
        "error": message,
        "code": code.as_u16()
    }));

    Ok(warp::reply::with_status(json, code))
}
