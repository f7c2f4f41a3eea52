//! API Server - HTTP server for the signal relay

use axum::{
    extract::State,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::auth::require_admin;
use crate::api::handlers::{self, AppState};
use crate::api::admin;
use crate::config::Config;

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    /// Create a new API server over an initialized pool
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let addr = config.server.listen_addr.clone();
        Self {
            state: Arc::new(AppState::new(db, config)),
            addr,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Admin routes (admin token required)
        let admin_routes = Router::new()
            .route("/issue_token", post(admin::issue_token))
            .route("/users", get(admin::list_users))
            .route("/follows", post(admin::add_follow).delete(admin::remove_follow))
            .route("/boosts", post(admin::grant_boost))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_admin,
            ));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route(
                "/signals",
                get(handlers::fetch_signals).post(handlers::publish_signal),
            )
            .route("/quota", get(handlers::get_quota))
            .route("/trades", post(handlers::post_trade))
            .route("/validate", post(handlers::validate))
            .route(
                "/ea/sync_open_positions",
                post(handlers::ea_sync_open_positions),
            )
            .nest("/admin", admin_routes)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                track_requests,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("Starting API server on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Request counters for /metrics
async fn track_requests(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    state.metrics.inc_requests();
    let response = next.run(req).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        state.metrics.inc_errors();
    }
    response
}
