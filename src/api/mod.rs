//! REST API and WebSocket server for the monitoring hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Pipeline components** shared through [`ApiState`]
//! - **WebSocket** monitor stream fed by the broadcast notifier
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `POST|GET /api/v1/events` - Event intake and audit query
//! - `GET /api/v1/alerts`, `GET|PATCH|DELETE /api/v1/alerts/:id` - Alert review
//! - `GET|PUT /api/v1/config` - Runtime settings
//! - `GET /api/v1/monitor/stats` - Dashboard counters
//! - `POST /api/v1/monitor/run`, `GET /api/v1/monitor/status` - Worker control
//! - `GET /api/v1/sessions`, `DELETE /api/v1/sessions/:connection_id` - Live sessions
//! - `POST /api/v1/listings` - Listing intake
//! - `POST /api/v1/milk`, `/api/v1/milk/anomalies/...` - Milk collection and anomalies
//! - `WS /api/v1/monitor/stream` - Real-time alert stream

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{ApiResponse, HealthResponse, StatsResponse};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiConfig;

/// Build the router with every route and layer
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route(
            "/api/v1/events",
            get(routes::events::query_events).post(routes::events::record_event),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route(
            "/api/v1/alerts/:id",
            get(routes::alerts::get_alert)
                .patch(routes::alerts::update_alert)
                .delete(routes::alerts::delete_alert),
        )
        .route(
            "/api/v1/config",
            get(routes::config::list_config).put(routes::config::update_config),
        )
        .route("/api/v1/monitor/stats", get(routes::stats::get_stats))
        .route("/api/v1/monitor/run", post(routes::monitor::run_now))
        .route("/api/v1/monitor/status", get(routes::monitor::status))
        .route("/api/v1/monitor/stream", get(websocket::websocket_handler))
        .route("/api/v1/sessions", get(routes::sessions::list_sessions))
        .route(
            "/api/v1/sessions/:connection_id",
            axum::routing::delete(routes::sessions::terminate_session),
        )
        .route("/api/v1/listings", post(routes::listings::create_listing))
        .route("/api/v1/milk", post(routes::milk::record_collection))
        .route("/api/v1/milk/anomalies", get(routes::milk::list_anomalies))
        .route(
            "/api/v1/milk/anomalies/:id",
            axum::routing::delete(routes::milk::delete_anomaly),
        )
        .route(
            "/api/v1/milk/anomalies/:id/slots/:slot/resolve",
            post(routes::milk::resolve_slot),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// A running API server
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Stop accepting connections and wait for in-flight requests
    ///
    /// Live monitor sessions should be terminated first; the server waits
    /// for every open connection.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!("API server task failed: {}", e);
        }
    }
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
pub async fn spawn_api_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<ApiServer> {
    info!("starting API server on {}", config.bind);

    let app = router(config, state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        if let Err(e) = server.await {
            error!("API server error: {}", e);
        }
    });

    Ok(ApiServer {
        addr,
        shutdown: shutdown_tx,
        task,
    })
}
