use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::Method,
    middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use bery_shared::constants::{ASSISTANT_ID, WS_PATH};

use crate::assistant::{KeywordResponder, Responder};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::registry::{ConnectionRegistry, SharedRegistry};
use crate::router::MessageRouter;
use crate::ws::ws_upgrade;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub router: MessageRouter,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
    /// One permit per allowed connection; `None` when unlimited.
    connection_slots: Option<Arc<Semaphore>>,
}

impl AppState {
    /// Fresh state with an empty registry and the keyword assistant.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_responder(config, Arc::new(KeywordResponder::new()))
    }

    pub fn with_responder(config: ServerConfig, responder: Arc<dyn Responder>) -> Self {
        let registry = ConnectionRegistry::shared();
        let router = MessageRouter::new(registry.clone(), responder, config.timings);
        let connection_slots =
            (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)));
        Self {
            registry,
            router,
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
            started_at: Instant::now(),
            connection_slots,
        }
    }

    /// Reserve a connection slot before upgrading.
    ///
    /// The returned permit must live as long as the connection. Refuses
    /// once `max_connections` slots are taken, counting upgrades still in
    /// flight.
    pub fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ServerError> {
        let Some(slots) = &self.connection_slots else {
            return Ok(None);
        };
        slots
            .clone()
            .try_acquire_owned()
            .map(Some)
            .map_err(|_| ServerError::TooManyConnections {
                max: self.config.max_connections,
            })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(WS_PATH, get(ws_upgrade))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Open connections, registered or not.
    clients: usize,
    /// Seconds since startup.
    uptime: u64,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    assistant: &'static str,
    online: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.registry.read().connection_count(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        assistant: ASSISTANT_ID,
        online: state.registry.read().online_count(),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(state, listener).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(
    state: AppState,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP / WebSocket server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
