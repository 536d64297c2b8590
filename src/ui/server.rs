//! Control panel HTTP server

use axum::{
    http::{header, HeaderMap, HeaderValue, Method},
    routing::{get, post},
    Extension, Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::UiConfig;
use crate::error::Result;
use crate::session::{SessionController, SessionEvent};
use crate::ui::{handlers, websocket};

/// Shared state for all routes
pub struct AppState {
    pub controller: SessionController,
    /// Fan-out of session events to `/ws` clients
    pub events: broadcast::Sender<SessionEvent>,
    /// Snapshot file sampled when video is switched on
    pub snapshot_path: Option<PathBuf>,
}

/// Browser origins allowed to talk to the panel
#[derive(Clone)]
pub struct TrustedOrigins(Arc<Vec<HeaderValue>>);

impl TrustedOrigins {
    pub fn from_config(config: &UiConfig) -> Self {
        let origins = config
            .trusted_origins()
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid panel origin {:?}", origin);
                    None
                }
            })
            .collect();
        Self(Arc::new(origins))
    }

    /// Requests without an `Origin` header come from non-browser clients
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        match headers.get(header::ORIGIN) {
            Some(origin) => self.0.iter().any(|trusted| trusted == origin),
            None => true,
        }
    }
}

/// Local control panel: status, mute, video toggle, disconnect, event stream
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/mute", post(handlers::set_mute))
            .route("/api/video", post(handlers::set_video))
            .route("/api/disconnect", post(handlers::disconnect))
            .route("/ws", get(websocket::events_handler))
            .layer(Extension(TrustedOrigins::from_config(&self.config)))
            .layer(self.cors_layer())
            .with_state(self.state.clone())
    }

    /// Same-origin by default; `cors_origins` opens the API to extra origins
    fn cors_layer(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        if self.config.cors_origins.is_empty() {
            return cors;
        }

        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }

    /// Bind the configured address and serve until the process exits
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Control panel listening on http://{}", addr);
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Spawn the server on the current runtime
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("Control panel error: {}", e);
            }
        })
    }
}
