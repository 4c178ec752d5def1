//! A minimal HTTP-01 responder serving key authorizations from memory.

use crate::challenge::http01::challenge_path;
use crate::challenge::Provider;
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

type TokenMap = Arc<RwLock<HashMap<String, String>>>;

#[derive(Clone, Default)]
struct AppState {
    tokens: TokenMap,
}

/// Serves `GET /.well-known/acme-challenge/:token` for every token presented to it.
///
/// The server runs until the `Http01Server` is dropped.
#[derive(Debug)]
pub struct Http01Server {
    tokens: TokenMap,
    local_addr: SocketAddr,
    handle: JoinHandle<hyper::Result<()>>,
}

impl Http01Server {
    /// Bind `bind_addr` and start serving on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] when the address can't be bound.
    pub fn spawn(bind_addr: SocketAddr) -> Result<Self, Error> {
        let state = AppState::default();
        let tokens = state.tokens.clone();
        let server = axum::Server::try_bind(&bind_addr)?.serve(routes(state).into_make_service());
        let local_addr = server.local_addr();
        tracing::info!("HTTP-01 server listening on {local_addr}");
        Ok(Http01Server {
            tokens,
            local_addr,
            handle: tokio::spawn(server),
        })
    }

    /// The bound address, useful when binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Http01Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[async_trait::async_trait]
impl Provider for Http01Server {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> anyhow::Result<()> {
        tracing::debug!("[{domain}] serving key authorization for token {token}");
        self.tokens
            .write()
            .await
            .insert(token.to_string(), key_auth.to_string());
        Ok(())
    }

    async fn clean_up(&self, _domain: &str, token: &str, _key_auth: &str) -> anyhow::Result<()> {
        self.tokens.write().await.remove(token);
        Ok(())
    }
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route(&challenge_path(":token"), get(key_authorization))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn key_authorization(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<String, StatusCode> {
    match state.tokens.read().await.get(&token) {
        Some(key_auth) => {
            tracing::info!("served key authentication for token {token}");
            Ok(key_auth.clone())
        }
        None => {
            tracing::debug!("no key authorization for token {token}");
            Err(StatusCode::NOT_FOUND)
        }
    }
}
