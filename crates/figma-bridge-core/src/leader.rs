//! Active role: owns the shared address, the plugin bridge and the HTTP
//! surfaces followers and the plugin talk to.
//!
//! Routes served on the shared address:
//!
//! - `GET /ping` - health check, `{"status":"ok","version":...}`
//! - `POST /rpc` - forwarded call from a follower
//! - `GET /ws` - WebSocket upgrade for the plugin
//!
//! The listener is bound before anything else starts, so a second process
//! fails fast with [`BridgeError::AddressInUse`].

use crate::bridge::Bridge;
use crate::cancel::CancellationToken;
use crate::config::{NetworkConfig, NodeConfig};
use crate::protocol::{ForwardRequest, ForwardResponse, HealthStatus};
use crate::{BridgeError, Result};
use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// State shared by the leader's handlers.
#[derive(Clone)]
struct LeaderState {
    bridge: Arc<Bridge>,
    rpc_timeout: Duration,
}

struct ServerTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A running leader. Dropping it without [`Leader::release`] aborts the server.
pub struct Leader {
    addr: SocketAddr,
    bridge: Arc<Bridge>,
    release_grace: Duration,
    server: Mutex<Option<ServerTask>>,
}

impl Leader {
    /// Bind the shared address and start serving.
    pub async fn acquire(config: &NodeConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                BridgeError::AddressInUse {
                    addr: config.addr.to_string(),
                }
            } else {
                BridgeError::from(e)
            }
        })?;
        let addr = listener.local_addr()?;

        let bridge = Arc::new(Bridge::new());
        let app = router(LeaderState {
            bridge: bridge.clone(),
            rpc_timeout: config.rpc_timeout,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("Leader server error: {}", e);
            }
        });

        info!("Leader listening on {}", addr);

        Ok(Self {
            addr,
            bridge,
            release_grace: config.release_grace,
            server: Mutex::new(Some(ServerTask {
                shutdown_tx,
                handle,
            })),
        })
    }

    /// The address actually bound (differs from the configured one for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn bridge(&self) -> Arc<Bridge> {
        self.bridge.clone()
    }

    /// Close the plugin connection, drain HTTP work for up to the grace
    /// period, then free the address. Safe to call more than once.
    pub async fn release(&self) {
        let task = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(ServerTask {
            shutdown_tx,
            mut handle,
        }) = task
        else {
            return;
        };

        let drain = async {
            self.bridge.close().await;
            let _ = shutdown_tx.send(());
            let _ = (&mut handle).await;
        };

        if tokio::time::timeout(self.release_grace, drain).await.is_err() {
            warn!(
                "Leader on {} did not drain within {:?}, aborting",
                self.addr, self.release_grace
            );
            handle.abort();
            let _ = handle.await;
        }
        info!("Leader released {}", self.addr);
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        let task = self
            .server
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(());
            task.handle.abort();
        }
    }
}

fn router(state: LeaderState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(NetworkConfig::PING_PATH, get(handle_ping))
        .route(NetworkConfig::RPC_PATH, post(handle_rpc))
        .route(NetworkConfig::WS_PATH, get(handle_ws))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn handle_ping() -> Json<HealthStatus> {
    Json(HealthStatus::ok(NetworkConfig::HEALTH_VERSION))
}

/// Forwarded call from a follower.
async fn handle_rpc(State(state): State<LeaderState>, body: Bytes) -> impl IntoResponse {
    let request: ForwardRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ForwardResponse::error(format!("invalid request body: {}", e))),
            );
        }
    };

    debug!("RPC call: {}", request.tool);

    let cancel = CancellationToken::new().with_timeout(state.rpc_timeout);
    let result = state
        .bridge
        .send_with_params(&request.tool, request.node_ids, request.params, &cancel)
        .await;

    match result {
        Ok(data) => (StatusCode::OK, Json(ForwardResponse::success(data))),
        Err(e) => {
            debug!("RPC error for {}: {}", request.tool, e);
            (StatusCode::OK, Json(ForwardResponse::error(e.to_string())))
        }
    }
}

/// Plugin connection endpoint.
async fn handle_ws(ws: WebSocketUpgrade, State(state): State<LeaderState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| state.bridge.serve_connection(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ephemeral_config;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router() -> Router {
        router(LeaderState {
            bridge: Arc::new(Bridge::new()),
            rpc_timeout: Duration::from_secs(1),
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping_reports_ok() {
        let response = test_router()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], NetworkConfig::HEALTH_VERSION);
    }

    #[tokio::test]
    async fn test_ping_rejects_post() {
        let response = test_router()
            .oneshot(Request::post("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let response = test_router()
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rpc_malformed_body_is_400() {
        let response = test_router()
            .oneshot(
                Request::post("/rpc")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"tool\":"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn test_rpc_without_plugin_reports_application_error() {
        let body = json!({"tool": "get_document"}).to_string();
        let response = test_router()
            .oneshot(
                Request::post("/rpc")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"error": "plugin not connected"}));
    }

    #[tokio::test]
    async fn test_second_acquire_reports_address_in_use() {
        let first = Leader::acquire(&ephemeral_config()).await.unwrap();
        let config = NodeConfig::builder()
            .addr(first.local_addr())
            .build()
            .unwrap();

        let err = Leader::acquire(&config).await.err().unwrap();
        assert!(err.is_address_in_use());
        first.release().await;
    }

    #[tokio::test]
    async fn test_release_frees_address_and_is_idempotent() {
        let first = Leader::acquire(&ephemeral_config()).await.unwrap();
        let addr = first.local_addr();
        first.release().await;
        first.release().await;

        let config = NodeConfig::builder().addr(addr).build().unwrap();
        let second = Leader::acquire(&config).await.unwrap();
        assert_eq!(second.local_addr(), addr);
        second.release().await;
    }
}
