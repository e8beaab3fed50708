// File: src/host.rs
// Purpose: Minimal dev server hosting the middleware chain behind axum

use crate::chain::MiddlewareChain;
use crate::error::ChainError;
use crate::http::RawRequest;
use crate::plugin::{HostConfig, Plugin, ServerContext};
use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across requests
#[derive(Clone)]
struct AppState {
    chain: Arc<MiddlewareChain>,
    max_body_bytes: usize,
}

/// Development server: a middleware chain plus the plugins configuring it.
pub struct DevServer {
    config: HostConfig,
    chain: Arc<MiddlewareChain>,
    plugins: Vec<Arc<dyn Plugin>>,
    max_body_bytes: usize,
}

impl DevServer {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            chain: Arc::new(MiddlewareChain::new()),
            plugins: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn chain(&self) -> Arc<MiddlewareChain> {
        self.chain.clone()
    }

    pub fn context(&self) -> ServerContext {
        ServerContext {
            root: self.config.root.clone(),
            chain: self.chain.clone(),
        }
    }

    /// Run a plugin's server hook if it applies to this configuration.
    ///
    /// Returns whether the plugin was activated.
    pub async fn install(&mut self, plugin: Arc<dyn Plugin>) -> Result<bool> {
        if !plugin.apply(&self.config) {
            info!(
                "Plugin '{}' inactive in '{}' mode",
                plugin.name(),
                self.config.mode
            );
            return Ok(false);
        }

        plugin.configure_server(&self.context()).await?;
        info!("Plugin '{}' configured", plugin.name());
        self.plugins.push(plugin);
        Ok(true)
    }

    /// Router answering every request through the chain.
    pub fn router(&self) -> Router {
        let state = AppState {
            chain: self.chain.clone(),
            max_body_bytes: self.max_body_bytes,
        };

        Router::new()
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}

async fn dispatch_handler(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read request body: {}", e);
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body rejected");
        }
    };

    let raw = RawRequest::from(axum::http::Request::from_parts(parts, bytes));
    match state.chain.dispatch(raw).await {
        Ok(res) => res.into_response(),
        Err(ChainError::Adaptation(e)) => {
            error!("{}", e);
            error_response(StatusCode::BAD_REQUEST, "Bad Request")
        }
        Err(e) => {
            error!("{:#}", anyhow::Error::from(e));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn error_response(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}
